//! Identity of a connected client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// What the server knows about one joined client.
///
/// Created when a client completes its introduction; handed to every
/// delegate the client's invocations run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Display name from the client's introduction.
    pub client_name: String,
    /// Wall-clock time the introduction completed.
    pub joined_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Record a client that has just introduced itself.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            client_name: client_name.into(),
            joined_at: Utc::now(),
        }
    }
}
