//! Component records shared between the registry and the wire.
//!
//! The server never interprets [`Component::attributes`]; it only stores
//! them and passes them through in delta messages. A component's identity
//! is its [`ComponentRef`]: the kind selects the table, the [`IDGroup`]
//! selects the slot and generation inside it.

use serde::{Deserialize, Serialize};
use serde_cbor::Value;

use crate::ids::IDGroup;

/// The closed set of component kinds the server can hold.
///
/// Declaration order is significant: snapshots list components grouped by
/// kind in exactly this order, methods first so a client can resolve
/// invocable methods before anything else arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Invocable server-side method.
    Method,
    /// Broadcast-only event source.
    Signal,
    /// Scene graph node.
    Entity,
    /// Data plot.
    Plot,
    /// Raw byte storage.
    Buffer,
    /// View into a buffer.
    BufferView,
    /// Surface shading parameters.
    Material,
    /// Image source.
    Image,
    /// Texture binding an image and a sampler.
    Texture,
    /// Texture sampling parameters.
    Sampler,
    /// Light source.
    Light,
    /// Renderable mesh made of patches.
    Geometry,
    /// One patch of a geometry.
    GeometryPatch,
    /// Tabular data source.
    Table,
}

impl ComponentKind {
    /// Every kind, in snapshot order.
    pub const ALL: [Self; 14] = [
        Self::Method,
        Self::Signal,
        Self::Entity,
        Self::Plot,
        Self::Buffer,
        Self::BufferView,
        Self::Material,
        Self::Image,
        Self::Texture,
        Self::Sampler,
        Self::Light,
        Self::Geometry,
        Self::GeometryPatch,
        Self::Table,
    ];

    /// Stable display name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Method => "Method",
            Self::Signal => "Signal",
            Self::Entity => "Entity",
            Self::Plot => "Plot",
            Self::Buffer => "Buffer",
            Self::BufferView => "BufferView",
            Self::Material => "Material",
            Self::Image => "Image",
            Self::Texture => "Texture",
            Self::Sampler => "Sampler",
            Self::Light => "Light",
            Self::Geometry => "Geometry",
            Self::GeometryPatch => "GeometryPatch",
            Self::Table => "Table",
        }
    }
}

impl core::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to a component: its kind and its ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Which table the ID belongs to.
    pub kind: ComponentKind,
    /// Slot and generation within that table.
    pub id: IDGroup,
}

impl ComponentRef {
    /// Build a reference from its parts.
    pub const fn new(kind: ComponentKind, id: IDGroup) -> Self {
        Self { kind, id }
    }

    /// Reference to a method by ID.
    pub const fn method(id: IDGroup) -> Self {
        Self::new(ComponentKind::Method, id)
    }

    /// Reference to a signal by ID.
    pub const fn signal(id: IDGroup) -> Self {
        Self::new(ComponentKind::Signal, id)
    }
}

impl core::fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{}", self.kind, self.id)
    }
}

/// Expected shape of one argument value.
///
/// The dispatcher checks every supplied argument against its shape before
/// the delegate runs. `Any` accepts every value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgShape {
    /// No constraint.
    #[default]
    Any,
    /// A text string.
    Text,
    /// An integer or a float.
    Number,
    /// A boolean.
    Bool,
    /// An array.
    List,
    /// A map.
    Map,
}

impl ArgShape {
    /// Whether `value` has this shape.
    pub const fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Text => matches!(value, Value::Text(_)),
            Self::Number => matches!(value, Value::Integer(_) | Value::Float(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::List => matches!(value, Value::Array(_)),
            Self::Map => matches!(value, Value::Map(_)),
        }
    }

    /// Stable display name of the shape.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Text => "text",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

impl core::fmt::Display for ArgShape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Documentation for one method argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDoc {
    /// Argument name.
    pub name: String,
    /// Free-form description shown to client users.
    #[serde(default)]
    pub doc: String,
    /// Whether the argument may be omitted.
    ///
    /// Optional arguments must trail the required ones; see
    /// [`ArgDoc::well_ordered`].
    #[serde(default)]
    pub optional: bool,
    /// Shape the supplied value must have.
    #[serde(default)]
    pub shape: ArgShape,
}

impl ArgDoc {
    /// A required argument of any shape.
    pub fn required(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            optional: false,
            shape: ArgShape::Any,
        }
    }

    /// An optional trailing argument of any shape.
    pub fn optional(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            optional: true,
            shape: ArgShape::Any,
        }
    }

    /// Constrain the argument to `shape`.
    #[must_use]
    pub const fn with_shape(mut self, shape: ArgShape) -> Self {
        self.shape = shape;
        self
    }

    /// Whether no required argument follows an optional one in `docs`.
    pub fn well_ordered(docs: &[Self]) -> bool {
        docs.iter()
            .skip_while(|doc| !doc.optional)
            .all(|doc| doc.optional)
    }
}

/// One live component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Slot and generation within the kind's table.
    pub id: IDGroup,
    /// Kind tag.
    pub kind: ComponentKind,
    /// Human-readable name.
    pub name: String,
    /// Opaque kind-specific payload.
    #[serde(default = "null_value")]
    pub attributes: Value,
    /// Argument documentation; only meaningful for methods and signals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg_doc: Vec<ArgDoc>,
}

impl Component {
    /// The fully qualified reference to this component.
    pub const fn reference(&self) -> ComponentRef {
        ComponentRef::new(self.kind, self.id)
    }

    /// Number of arguments a caller must supply.
    pub fn required_args(&self) -> usize {
        self.arg_doc.iter().filter(|a| !a.optional).count()
    }
}

const fn null_value() -> Value {
    Value::Null
}
