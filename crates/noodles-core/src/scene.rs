//! The complete authoritative state of one server.
//!
//! A [`Scene`] bundles the registry (components, sequencing, subscribers)
//! with the dispatcher (method delegates). It is owned by exactly one
//! writer; every operation takes `&mut self` and runs to completion.

use std::time::Duration;

use noodles_types::{
    ArgDoc, Component, IDGroup, InvokeReply, InvokeRequest, ServerMessage, SessionId, SessionInfo,
    Value,
};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

use crate::allocator::IdAllocator;
use crate::broadcast::BroadcastError;
use crate::builtins::{self, BuiltinMethods};
use crate::config::ServerConfig;
use crate::dispatch::{DelegateError, Dispatcher, InvokeContext};
use crate::registry::{Registry, RegistryError};

/// Registry plus dispatcher, driven by a single writer.
#[derive(Debug)]
pub struct Scene {
    registry: Registry,
    dispatcher: Dispatcher,
    builtins: BuiltinMethods,
}

impl Scene {
    /// Build a scene from configuration, with the built-in methods
    /// installed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AllocatorExhausted`] if the slot limit is
    /// too small to hold the built-in methods.
    pub fn new(config: &ServerConfig) -> Result<Self, RegistryError> {
        Self::with_limits(config.max_slots_per_kind, config.invoke_timeout())
    }

    /// Build a scene with an explicit slot limit and delegate deadline.
    ///
    /// # Errors
    ///
    /// See [`Scene::new`].
    pub fn with_limits(
        max_slots_per_kind: Option<u32>,
        invoke_timeout: Option<Duration>,
    ) -> Result<Self, RegistryError> {
        let allocator = max_slots_per_kind.map_or_else(IdAllocator::new, IdAllocator::with_capacity);
        let mut registry = Registry::with_allocator(allocator);
        let mut dispatcher = Dispatcher::new().with_deadline(invoke_timeout);
        let builtins = builtins::install(&mut registry, &mut dispatcher)?;
        info!(methods = dispatcher.len(), "scene initialized");
        Ok(Self {
            registry,
            dispatcher,
            builtins,
        })
    }

    /// IDs of the built-in methods.
    pub const fn builtins(&self) -> BuiltinMethods {
        self.builtins
    }

    /// Read access to the registry.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access to the registry, for seeding content.
    pub const fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Publish a new method and bind its delegate.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AllocatorExhausted`] if no ID is available.
    pub fn register_method<F>(
        &mut self,
        name: &str,
        arg_doc: Vec<ArgDoc>,
        delegate: F,
    ) -> Result<IDGroup, RegistryError>
    where
        F: Fn(&mut InvokeContext<'_>, Option<&Component>, &[Value]) -> Result<Value, DelegateError>
            + Send
            + 'static,
    {
        self.dispatcher
            .register_method(&mut self.registry, name, arg_doc, delegate)
    }

    /// Admit a session: queue its snapshot, then start broadcasting to it.
    ///
    /// # Errors
    ///
    /// Propagates [`BroadcastError`] if the session cannot be admitted.
    pub fn join(
        &mut self,
        session: &SessionInfo,
        sender: Sender<ServerMessage>,
    ) -> Result<(), BroadcastError> {
        self.registry.subscribe(session.id, sender)?;
        info!(
            session = %session.id,
            client = %session.client_name,
            components = self.registry.len(),
            "session joined"
        );
        Ok(())
    }

    /// Stop broadcasting to a session. Components are left untouched.
    pub fn leave(&mut self, session: SessionId) -> bool {
        let removed = self.registry.unsubscribe(session);
        if removed {
            info!(%session, "session left");
        }
        removed
    }

    /// Run an invocation on behalf of `session` and queue its reply.
    ///
    /// The reply is queued on the session's own stream after every delta
    /// the delegate produced. Returns a copy of the reply.
    pub fn invoke(&mut self, session: &SessionInfo, request: InvokeRequest) -> InvokeReply {
        let reply = self
            .dispatcher
            .invoke(&mut self.registry, session, request);
        self.dispatcher.prune(&self.registry);

        let queued = self
            .registry
            .deliver(session.id, ServerMessage::InvokeReply(reply.clone()));
        if !queued {
            debug!(session = %session.id, "reply dropped for departed session");
        }
        reply
    }
}
