//! Methods every server exposes.
//!
//! These give clients a generic way to mutate any component they can
//! reference, independent of the domain methods a deployment registers.
//! All of them act on the invocation target. The built-in methods
//! themselves are refused as targets, so no client can remove or rename
//! them out from under the others.

use noodles_types::{ArgDoc, ArgShape, Component, ComponentKind, ComponentRef, IDGroup, Value};
use tracing::debug;

use crate::dispatch::{Delegate, DelegateError, Dispatcher, InvokeContext};
use crate::registry::{Registry, RegistryError};

/// Name of the built-in delete method.
pub const DELETE_COMPONENT: &str = "noo::delete_component";

/// Name of the built-in rename method.
pub const RENAME_COMPONENT: &str = "noo::rename_component";

/// Name of the built-in attribute replacement method.
pub const SET_ATTRIBUTES: &str = "noo::set_attributes";

/// IDs of the installed built-in methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinMethods {
    /// [`DELETE_COMPONENT`].
    pub delete_component: IDGroup,
    /// [`RENAME_COMPONENT`].
    pub rename_component: IDGroup,
    /// [`SET_ATTRIBUTES`].
    pub set_attributes: IDGroup,
}

impl BuiltinMethods {
    /// Whether `target` is one of the built-in methods.
    pub fn contains(&self, target: ComponentRef) -> bool {
        target.kind == ComponentKind::Method
            && [self.delete_component, self.rename_component, self.set_attributes]
                .contains(&target.id)
    }
}

/// Register the built-in methods.
///
/// # Errors
///
/// Returns [`RegistryError::AllocatorExhausted`] if the method table is full.
pub fn install(
    registry: &mut Registry,
    dispatcher: &mut Dispatcher,
) -> Result<BuiltinMethods, RegistryError> {
    let builtins = BuiltinMethods {
        delete_component: registry.create_method(DELETE_COMPONENT, Vec::new())?,
        rename_component: registry.create_method(
            RENAME_COMPONENT,
            vec![ArgDoc::required("name", "New display name").with_shape(ArgShape::Text)],
        )?,
        set_attributes: registry.create_method(
            SET_ATTRIBUTES,
            vec![ArgDoc::required("attributes", "Replacement attribute record")],
        )?,
    };

    let bindings: [(IDGroup, TargetAction); 3] = [
        (builtins.delete_component, delete_target),
        (builtins.rename_component, rename_target),
        (builtins.set_attributes, set_target_attributes),
    ];
    for (method, action) in bindings {
        dispatcher.bind(
            method,
            Box::new(Builtin {
                reserved: builtins,
                action,
            }),
        );
    }
    debug!(?builtins, "built-in methods installed");
    Ok(builtins)
}

type TargetAction = fn(&mut InvokeContext<'_>, ComponentRef, &[Value]) -> Result<Value, DelegateError>;

/// A built-in bound to its action, refusing the built-ins as targets.
struct Builtin {
    reserved: BuiltinMethods,
    action: TargetAction,
}

impl Delegate for Builtin {
    fn invoke(
        &self,
        ctx: &mut InvokeContext<'_>,
        target: Option<&Component>,
        args: &[Value],
    ) -> Result<Value, DelegateError> {
        let target = target
            .map(Component::reference)
            .ok_or_else(|| DelegateError::new("this method requires a target component"))?;
        if self.reserved.contains(target) {
            return Err(DelegateError::new(format!(
                "{target} is a built-in method and cannot be changed"
            )));
        }
        (self.action)(ctx, target, args)
    }
}

fn delete_target(
    ctx: &mut InvokeContext<'_>,
    target: ComponentRef,
    _args: &[Value],
) -> Result<Value, DelegateError> {
    ctx.delete(target)?;
    Ok(Value::Null)
}

fn rename_target(
    ctx: &mut InvokeContext<'_>,
    target: ComponentRef,
    args: &[Value],
) -> Result<Value, DelegateError> {
    let Some(Value::Text(name)) = args.first() else {
        return Err(DelegateError::new("`name` must be a string"));
    };
    ctx.rename(target, name.clone())?;
    Ok(Value::Null)
}

fn set_target_attributes(
    ctx: &mut InvokeContext<'_>,
    target: ComponentRef,
    args: &[Value],
) -> Result<Value, DelegateError> {
    let attributes = args.first().cloned().unwrap_or(Value::Null);
    ctx.update(target, attributes)?;
    Ok(Value::Null)
}
