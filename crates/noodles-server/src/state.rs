//! Shared application state for the listener.
//!
//! The only shared thing is the hub's command queue; all scene state lives
//! inside the hub task.

use crate::hub::HubHandle;
use crate::session::SessionConfig;

/// State handed to every connection handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command queue of the hub task.
    pub hub: HubHandle,
    /// Limits applied to each new session.
    pub session: SessionConfig,
}

impl AppState {
    /// Bundle the hub handle with per-session limits.
    pub const fn new(hub: HubHandle, session: SessionConfig) -> Self {
        Self { hub, session }
    }
}
