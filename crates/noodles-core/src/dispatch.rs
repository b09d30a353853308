//! Method invocation.
//!
//! The [`Dispatcher`] turns an [`InvokeRequest`] into an [`InvokeReply`]:
//!
//! 1. Resolve the method through the registry (`MethodNotFound`).
//! 2. Resolve the optional target (`TargetNotFound`).
//! 3. Check the argument count and each argument's shape against the
//!    method's [`ArgDoc`] list (`ArgumentMismatch`). Delegates receive
//!    arguments that already passed these checks.
//! 4. Run the bound [`Delegate`] with an [`InvokeContext`]. Anything the
//!    delegate creates, updates, or deletes is published as it happens.
//!    A delegate that panics is reported as a `DelegateError`; the panic
//!    does not leave the dispatcher.
//!
//! The reply is returned to the caller, which queues it for the invoking
//! session after the delegate's deltas.
//!
//! # Partial effects
//!
//! Delegates are not transactional. A delegate that fails, panics, or
//! overruns the deadline after mutating the registry leaves those mutations
//! in place; they have already been published to every subscriber.
//!
//! [`ArgDoc`]: noodles_types::ArgDoc

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use noodles_types::{
    ArgDoc, ArgShape, Component, ComponentKind, ComponentRef, ErrorCode, IDGroup, InvokeReply,
    InvokeRequest, SessionInfo, Value,
};
use tracing::{debug, warn};

use crate::registry::{Registry, RegistryError};

/// Failure reported by a delegate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DelegateError {
    /// Human-readable description, forwarded to the invoking client.
    pub message: String,
}

impl DelegateError {
    /// Build a delegate error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RegistryError> for DelegateError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.to_string())
    }
}

/// Reasons an invocation did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The method ID is unknown or stale.
    #[error("method {0} not found")]
    MethodNotFound(IDGroup),

    /// The target reference is unknown or stale.
    #[error("target {0} not found")]
    TargetNotFound(ComponentRef),

    /// Wrong number of arguments.
    #[error("method `{method}` takes {min}..={max} arguments, got {got}")]
    ArgumentMismatch {
        /// Name of the invoked method.
        method: String,
        /// Required argument count.
        min: usize,
        /// Total documented argument count.
        max: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// An argument does not have its documented shape.
    #[error("argument `{argument}` of `{method}` must be {expected}")]
    ArgumentShape {
        /// Name of the invoked method.
        method: String,
        /// Name of the offending argument.
        argument: String,
        /// Documented shape.
        expected: ArgShape,
    },

    /// The delegate failed, or the method has no delegate.
    #[error("delegate failed: {0}")]
    Delegate(#[from] DelegateError),

    /// The delegate finished after the invocation deadline.
    #[error("delegate exceeded its {0:?} deadline")]
    DelegateTimeout(Duration),
}

impl InvokeError {
    /// Wire error code for this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::TargetNotFound(_) => ErrorCode::TargetNotFound,
            Self::ArgumentMismatch { .. } | Self::ArgumentShape { .. } => {
                ErrorCode::ArgumentMismatch
            }
            Self::Delegate(_) => ErrorCode::DelegateError,
            Self::DelegateTimeout(_) => ErrorCode::DelegateTimeout,
        }
    }
}

/// What a delegate can see and do while it runs.
///
/// Passed explicitly to every delegate; there is no ambient server state.
pub struct InvokeContext<'a> {
    registry: &'a mut Registry,
    session: &'a SessionInfo,
}

impl<'a> InvokeContext<'a> {
    /// Build a context for one invocation.
    pub fn new(registry: &'a mut Registry, session: &'a SessionInfo) -> Self {
        Self { registry, session }
    }

    /// The invoking session.
    pub const fn session(&self) -> &SessionInfo {
        self.session
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &Registry {
        &*self.registry
    }

    /// Look up a live component.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or stale references.
    pub fn get(&self, target: ComponentRef) -> Result<&Component, RegistryError> {
        self.registry.get(target)
    }

    /// Create a component; its Create delta is published immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AllocatorExhausted`] if no ID is available.
    pub fn create(
        &mut self,
        kind: ComponentKind,
        name: impl Into<String>,
        attributes: Value,
    ) -> Result<ComponentRef, RegistryError> {
        let id = self.registry.create(kind, name, attributes)?;
        Ok(ComponentRef::new(kind, id))
    }

    /// Replace a component's attributes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or stale references.
    pub fn update(&mut self, target: ComponentRef, attributes: Value) -> Result<(), RegistryError> {
        self.registry.update(target, attributes)
    }

    /// Rename a component.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or stale references.
    pub fn rename(&mut self, target: ComponentRef, name: impl Into<String>) -> Result<(), RegistryError> {
        self.registry.rename(target, name)
    }

    /// Delete a component.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or stale references.
    pub fn delete(&mut self, target: ComponentRef) -> Result<(), RegistryError> {
        self.registry.delete(target)
    }

    /// Fire a signal to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `signal` is not a live signal.
    pub fn emit_signal(
        &mut self,
        signal: IDGroup,
        target: Option<ComponentRef>,
        args: Vec<Value>,
    ) -> Result<usize, RegistryError> {
        self.registry.emit_signal(signal, target, args)
    }
}

/// Server-side logic bound to a method.
pub trait Delegate: Send {
    /// Run the method.
    ///
    /// `target` is a copy of the target component as it was when the
    /// invocation was resolved.
    ///
    /// # Errors
    ///
    /// Any [`DelegateError`] is returned to the invoking client as a
    /// `DelegateError` reply.
    fn invoke(
        &self,
        ctx: &mut InvokeContext<'_>,
        target: Option<&Component>,
        args: &[Value],
    ) -> Result<Value, DelegateError>;
}

impl<F> Delegate for F
where
    F: Fn(&mut InvokeContext<'_>, Option<&Component>, &[Value]) -> Result<Value, DelegateError>
        + Send,
{
    fn invoke(
        &self,
        ctx: &mut InvokeContext<'_>,
        target: Option<&Component>,
        args: &[Value],
    ) -> Result<Value, DelegateError> {
        self(ctx, target, args)
    }
}

/// Table of delegates keyed by method ID.
pub struct Dispatcher {
    delegates: HashMap<IDGroup, Box<dyn Delegate>>,
    deadline: Option<Duration>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("bound", &self.delegates.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no bindings and no deadline.
    pub fn new() -> Self {
        Self {
            delegates: HashMap::new(),
            deadline: None,
        }
    }

    /// Report `DelegateTimeout` for delegates that run longer than
    /// `deadline`. Delegates are never interrupted.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Bind `delegate` to an existing method, replacing any previous one.
    pub fn bind(&mut self, method: IDGroup, delegate: Box<dyn Delegate>) {
        self.delegates.insert(method, delegate);
    }

    /// Create a method component and bind `delegate` to it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MisorderedArgs`] for a required argument
    /// after an optional one, or [`RegistryError::AllocatorExhausted`] if
    /// no ID is available.
    pub fn register_method<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        arg_doc: Vec<ArgDoc>,
        delegate: F,
    ) -> Result<IDGroup, RegistryError>
    where
        F: Fn(&mut InvokeContext<'_>, Option<&Component>, &[Value]) -> Result<Value, DelegateError>
            + Send
            + 'static,
    {
        let id = registry.create_method(name, arg_doc)?;
        self.bind(id, Box::new(delegate));
        debug!(method = name, %id, "method registered");
        Ok(id)
    }

    /// Drop bindings whose method no longer exists.
    pub fn prune(&mut self, registry: &Registry) {
        self.delegates
            .retain(|id, _| registry.contains(ComponentRef::method(*id)));
    }

    /// Number of bound delegates.
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Whether no delegates are bound.
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    /// Run an invocation and package the outcome as a reply.
    pub fn invoke(
        &self,
        registry: &mut Registry,
        session: &SessionInfo,
        request: InvokeRequest,
    ) -> InvokeReply {
        let invoke_id = request.invoke_id.clone();
        match self.try_invoke(registry, session, &request) {
            Ok(result) => InvokeReply::success(invoke_id, result),
            Err(err) => {
                debug!(session = %session.id, method = %request.method, error = %err, "invocation failed");
                InvokeReply::failure(invoke_id, err.code(), err.to_string())
            }
        }
    }

    /// Run an invocation.
    ///
    /// # Errors
    ///
    /// Returns the [`InvokeError`] for whichever step failed.
    pub fn try_invoke(
        &self,
        registry: &mut Registry,
        session: &SessionInfo,
        request: &InvokeRequest,
    ) -> Result<Value, InvokeError> {
        let method = registry
            .get(ComponentRef::method(request.method))
            .map_err(|_stale| InvokeError::MethodNotFound(request.method))?;

        let target = request
            .target
            .map(|target| {
                registry
                    .get(target)
                    .cloned()
                    .map_err(|_stale| InvokeError::TargetNotFound(target))
            })
            .transpose()?;

        check_args(method, &request.args)?;

        let delegate = self.delegates.get(&request.method).ok_or_else(|| {
            InvokeError::Delegate(DelegateError::new(format!(
                "no delegate bound to method `{}`",
                method.name
            )))
        })?;

        let started = Instant::now();
        let mut ctx = InvokeContext::new(registry, session);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            delegate.invoke(&mut ctx, target.as_ref(), &request.args)
        }))
        .unwrap_or_else(|payload| {
            warn!(
                session = %session.id,
                method = %request.method,
                panic = panic_message(&*payload),
                "delegate panicked"
            );
            Err(DelegateError::new("delegate panicked"))
        });
        let elapsed = started.elapsed();

        if let Some(deadline) = self.deadline {
            if elapsed > deadline {
                warn!(
                    session = %session.id,
                    method = %request.method,
                    elapsed_ms = elapsed.as_millis(),
                    "delegate overran its deadline"
                );
                return Err(InvokeError::DelegateTimeout(deadline));
            }
        }

        outcome.map_err(InvokeError::Delegate)
    }
}

fn check_args(method: &Component, args: &[Value]) -> Result<(), InvokeError> {
    let min = method.required_args();
    let max = method.arg_doc.len();
    if !(min..=max).contains(&args.len()) {
        return Err(InvokeError::ArgumentMismatch {
            method: method.name.clone(),
            min,
            max,
            got: args.len(),
        });
    }

    // An explicit null stands in for an omitted optional argument.
    let misshapen = method.arg_doc.iter().zip(args).find(|(doc, value)| {
        let omitted = doc.optional && matches!(value, Value::Null);
        !omitted && !doc.shape.accepts(value)
    });
    match misshapen {
        Some((doc, _)) => Err(InvokeError::ArgumentShape {
            method: method.name.clone(),
            argument: doc.name.clone(),
            expected: doc.shape,
        }),
        None => Ok(()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
