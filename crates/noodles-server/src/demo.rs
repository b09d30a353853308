//! Demo content registered by the binary.
//!
//! `new_point_plot` builds the full component graph a client needs to draw
//! a point cloud: a buffer holding the packed positions, a view into it, a
//! material, and a geometry whose single patch ties the view and material
//! together.

use std::collections::BTreeMap;

use noodles_core::{DelegateError, InvokeContext, RegistryError, Scene};
use noodles_types::{ArgDoc, ArgShape, Component, ComponentKind, IDGroup, Value};

/// Name of the demo method.
pub const NEW_POINT_PLOT: &str = "new_point_plot";

/// Vertices used when the caller supplies no points: a unit octahedron.
const DEFAULT_POINTS: [[f32; 3]; 6] = [
    [0.5, 0.0, 0.0],
    [-0.5, 0.0, 0.0],
    [0.0, 0.5, 0.0],
    [0.0, -0.5, 0.0],
    [0.0, 0.0, 0.5],
    [0.0, 0.0, -0.5],
];

/// Bytes per packed position: three little-endian `f32`s.
const POSITION_STRIDE: usize = 12;

/// Register the demo methods on `scene`.
///
/// # Errors
///
/// Returns [`RegistryError::AllocatorExhausted`] if the method table is full.
pub fn install(scene: &mut Scene) -> Result<IDGroup, RegistryError> {
    scene.register_method(
        NEW_POINT_PLOT,
        vec![ArgDoc::optional("points", "List of [x, y, z] positions").with_shape(ArgShape::List)],
        new_point_plot,
    )
}

fn new_point_plot(
    ctx: &mut InvokeContext<'_>,
    _target: Option<&Component>,
    args: &[Value],
) -> Result<Value, DelegateError> {
    let points = match args.first() {
        Some(Value::Array(points)) => parse_points(points)?,
        _ => DEFAULT_POINTS.to_vec(),
    };
    let bytes = pack_positions(&points);
    let count = points.len();

    let buffer = ctx.create(
        ComponentKind::Buffer,
        "Point Buffer",
        map([
            ("size", usize_value(bytes.len())),
            ("inline_bytes", Value::Bytes(bytes.clone())),
        ]),
    )?;
    let view = ctx.create(
        ComponentKind::BufferView,
        "Point View",
        map([
            ("source_buffer", id_value(buffer.id)),
            ("type", text("GEOMETRY")),
            ("offset", usize_value(0)),
            ("length", usize_value(bytes.len())),
        ]),
    )?;
    let material = ctx.create(ComponentKind::Material, "Point Material", material_attributes())?;

    let position = map([
        ("view", id_value(view.id)),
        ("semantic", text("POSITION")),
        ("channel", usize_value(0)),
        ("offset", usize_value(0)),
        ("stride", usize_value(POSITION_STRIDE)),
        ("format", text("VEC3")),
    ]);
    let patch = map([
        ("attributes", Value::Array(vec![position])),
        ("vertex_count", usize_value(count)),
        ("type", text("POINTS")),
        ("material", id_value(material.id)),
    ]);
    let geometry = ctx.create(
        ComponentKind::Geometry,
        "Point Plot",
        map([("patches", Value::Array(vec![patch]))]),
    )?;

    tracing::debug!(%buffer, %view, %material, %geometry, points = count, "point plot created");
    Ok(id_value(geometry.id))
}

fn parse_points(points: &[Value]) -> Result<Vec<[f32; 3]>, DelegateError> {
    points
        .iter()
        .map(|point| match point {
            Value::Array(xyz) => match xyz.as_slice() {
                [x, y, z] => Ok([coordinate(x)?, coordinate(y)?, coordinate(z)?]),
                _ => Err(DelegateError::new("each point must be [x, y, z]")),
            },
            _ => Err(DelegateError::new("each point must be [x, y, z]")),
        })
        .collect()
}

// Positions are packed as f32; the narrowing is intended.
#[allow(clippy::cast_possible_truncation)]
fn coordinate(value: &Value) -> Result<f32, DelegateError> {
    match value {
        Value::Float(f) => Ok(*f as f32),
        Value::Integer(i) => i16::try_from(*i)
            .map(f32::from)
            .map_err(|_overflow| DelegateError::new(format!("coordinate {i} is out of range"))),
        _ => Err(DelegateError::new("coordinates must be numbers")),
    }
}

fn pack_positions(points: &[[f32; 3]]) -> Vec<u8> {
    points
        .iter()
        .flatten()
        .flat_map(|c| c.to_le_bytes())
        .collect()
}

fn material_attributes() -> Value {
    let white = [1.0, 1.0, 1.0, 1.0].into_iter().map(Value::Float).collect();
    map([("base_color", Value::Array(white))])
}

fn text(s: &str) -> Value {
    Value::Text(String::from(s))
}

fn usize_value(n: usize) -> Value {
    Value::Integer(i128::try_from(n).unwrap_or(i128::MAX))
}

fn id_value(id: IDGroup) -> Value {
    Value::Array(vec![
        Value::Integer(i128::from(id.slot)),
        Value::Integer(i128::from(id.generation)),
    ])
}

fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(String::from(k)), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use noodles_types::{ErrorCode, InvokeRequest, SessionInfo};

    use super::*;

    fn invoke(scene: &mut Scene, method: IDGroup, args: Vec<Value>) -> noodles_types::InvokeReply {
        scene.invoke(
            &SessionInfo::new("t"),
            InvokeRequest {
                invoke_id: None,
                method,
                target: None,
                args,
            },
        )
    }

    fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        match value {
            Value::Map(entries) => entries.get(&text(key)),
            _ => None,
        }
    }

    fn first(value: Option<&Value>) -> Option<&Value> {
        match value {
            Some(Value::Array(items)) => items.first(),
            _ => None,
        }
    }

    #[test]
    fn point_plot_builds_buffer_view_material_and_geometry() {
        let mut scene = Scene::with_limits(None, None).unwrap();
        let method = install(&mut scene).unwrap();
        let reply = invoke(&mut scene, method, Vec::new());
        assert!(reply.is_success());

        let registry = scene.registry();
        let buffer = registry.find_by_name(ComponentKind::Buffer, "Point Buffer").unwrap();
        let view = registry.find_by_name(ComponentKind::BufferView, "Point View").unwrap();
        let material = registry
            .find_by_name(ComponentKind::Material, "Point Material")
            .unwrap();
        let geometry = registry
            .find_by_name(ComponentKind::Geometry, "Point Plot")
            .unwrap();
        assert_eq!(reply.result, Some(id_value(geometry.id)));

        let expected_len = usize_value(72);
        assert_eq!(field(&buffer.attributes, "size"), Some(&expected_len));
        assert_eq!(field(&view.attributes, "source_buffer"), Some(&id_value(buffer.id)));

        let patch = first(field(&geometry.attributes, "patches")).unwrap();
        assert_eq!(field(patch, "material"), Some(&id_value(material.id)));
        assert_eq!(field(patch, "vertex_count"), Some(&usize_value(6)));
        let position = first(field(patch, "attributes")).unwrap();
        assert_eq!(field(position, "view"), Some(&id_value(view.id)));
    }

    #[test]
    fn bad_points_are_rejected_before_creating_anything() {
        let mut scene = Scene::with_limits(None, None).unwrap();
        let method = install(&mut scene).unwrap();
        let before = scene.registry().len();
        let reply = invoke(&mut scene, method, vec![Value::Array(vec![Value::Integer(1)])]);
        assert_eq!(reply.error.map(|e| e.code), Some(ErrorCode::DelegateError));
        assert_eq!(scene.registry().len(), before);
    }

    #[test]
    fn non_list_points_are_an_argument_mismatch() {
        let mut scene = Scene::with_limits(None, None).unwrap();
        let method = install(&mut scene).unwrap();
        let reply = invoke(&mut scene, method, vec![text("nope")]);
        assert_eq!(reply.error.map(|e| e.code), Some(ErrorCode::ArgumentMismatch));
    }

    #[test]
    fn caller_points_are_packed() {
        let mut scene = Scene::with_limits(None, None).unwrap();
        let method = install(&mut scene).unwrap();
        let point = Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Float(3.5)]);
        let reply = invoke(&mut scene, method, vec![Value::Array(vec![point])]);
        assert!(reply.is_success());

        let buffer = scene
            .registry()
            .find_by_name(ComponentKind::Buffer, "Point Buffer")
            .unwrap();
        let bytes: Vec<u8> = [1.0_f32, 2.0, 3.5].iter().flat_map(|c| c.to_le_bytes()).collect();
        assert_eq!(field(&buffer.attributes, "inline_bytes"), Some(&Value::Bytes(bytes)));
    }
}
