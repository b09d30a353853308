//! The hub: the single task that owns the scene.
//!
//! Connection tasks never touch the registry. They send [`HubCommand`]s
//! through a [`HubHandle`]; the hub applies them one at a time, in arrival
//! order, and every resulting message leaves through the per-session
//! queues the broadcaster owns. This is the only writer of scene state.

use std::collections::BTreeMap;

use noodles_core::{BroadcastError, Scene};
use noodles_types::{InvokeRequest, ServerMessage, SessionId, SessionInfo};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Work items processed by the hub.
#[derive(Debug)]
pub enum HubCommand {
    /// Admit a session and queue its snapshot.
    ///
    /// The hub creates the session's outbound queue, sized to hold the
    /// snapshot plus `headroom` live messages.
    Join {
        /// The introduced client.
        info: SessionInfo,
        /// Queue room beyond the snapshot.
        headroom: usize,
        /// The receiving end of the session's queue, once admitted.
        reply: oneshot::Sender<Result<mpsc::Receiver<ServerMessage>, BroadcastError>>,
    },
    /// Forget a session. Its components are kept.
    Leave {
        /// The departing session.
        session: SessionId,
    },
    /// Run a method on behalf of a session.
    Invoke {
        /// The invoking session.
        session: SessionId,
        /// The request as received.
        request: InvokeRequest,
    },
    /// Stop the hub after the commands already queued.
    Shutdown,
}

/// Cloneable sender side of the hub's command queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Admit a session and return its outbound queue, already holding
    /// the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HubUnavailable`] if the hub has stopped or
    /// refused the session.
    pub async fn join(
        &self,
        info: SessionInfo,
        headroom: usize,
    ) -> Result<mpsc::Receiver<ServerMessage>, SessionError> {
        let (reply, outcome) = oneshot::channel();
        self.send(HubCommand::Join {
            info,
            headroom,
            reply,
        })
        .await?;
        let queue = outcome.await.map_err(|_dropped| stopped())??;
        Ok(queue)
    }

    /// Remove a session from the broadcast set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HubUnavailable`] if the hub has stopped.
    pub async fn leave(&self, session: SessionId) -> Result<(), SessionError> {
        self.send(HubCommand::Leave { session }).await
    }

    /// Queue an invocation. The reply arrives on the session's outbound
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HubUnavailable`] if the hub has stopped.
    pub async fn invoke(
        &self,
        session: SessionId,
        request: InvokeRequest,
    ) -> Result<(), SessionError> {
        self.send(HubCommand::Invoke { session, request }).await
    }

    /// Ask the hub to stop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HubUnavailable`] if the hub already stopped.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(HubCommand::Shutdown).await
    }

    async fn send(&self, command: HubCommand) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_closed| stopped())
    }
}

fn stopped() -> SessionError {
    SessionError::HubUnavailable(String::from("hub task has stopped"))
}

/// The single writer.
#[derive(Debug)]
pub struct Hub {
    scene: Scene,
    sessions: BTreeMap<SessionId, SessionInfo>,
    commands: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub around `scene` with a command queue of `capacity`.
    pub fn new(scene: Scene, capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            scene,
            sessions: BTreeMap::new(),
            commands: rx,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Run the hub on its own task. The task yields the scene when the hub
    /// stops.
    pub fn spawn(scene: Scene, capacity: usize) -> (HubHandle, JoinHandle<Scene>) {
        let (hub, handle) = Self::new(scene, capacity);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process commands until [`HubCommand::Shutdown`] or until every
    /// handle is dropped.
    pub async fn run(mut self) -> Scene {
        info!("hub started");
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        info!(
            sessions = self.sessions.len(),
            components = self.scene.registry().len(),
            "hub stopped"
        );
        self.scene
    }

    /// Apply one command. Returns `false` once the hub should stop.
    fn handle(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Join {
                info,
                headroom,
                reply,
            } => {
                let capacity = self
                    .scene
                    .registry()
                    .len()
                    .saturating_add(headroom)
                    .clamp(1, Semaphore::MAX_PERMITS);
                let (sender, queue) = mpsc::channel(capacity);
                let outcome = self.scene.join(&info, sender).map(|()| queue);
                if outcome.is_ok() {
                    self.sessions.insert(info.id, info);
                }
                if reply.send(outcome).is_err() {
                    debug!("joining session went away before admission");
                }
            }
            HubCommand::Leave { session } => {
                self.sessions.remove(&session);
                self.scene.leave(session);
            }
            HubCommand::Invoke { session, request } => self.invoke(session, request),
            HubCommand::Shutdown => return false,
        }
        true
    }

    fn invoke(&mut self, session: SessionId, request: InvokeRequest) {
        // An evicted session has no queue left to reply on.
        if !self.scene.registry().broadcaster().contains(session) {
            debug!(%session, method = %request.method, "dropping invocation from unsubscribed session");
            return;
        }
        let Some(info) = self.sessions.get(&session) else {
            warn!(%session, "invocation from unknown session");
            return;
        };
        let reply = self.scene.invoke(info, request);
        debug!(%session, success = reply.is_success(), "invocation handled");
    }
}
