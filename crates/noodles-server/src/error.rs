//! Error types for the scene server.
//!
//! [`SessionError`] ends a single connection and never affects the scene
//! or other sessions. [`AppError`] is what the binary's `main` propagates.

use noodles_core::{BroadcastError, ConfigError, RegistryError};
use noodles_types::CodecError;

use crate::server::ServerError;

/// Reasons a client connection is closed by the server.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client did not complete its introduction.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The client sent a message that is not allowed in its current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A frame could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The hub task has stopped or refused the session.
    #[error("hub unavailable: {0}")]
    HubUnavailable(String),

    /// The connection failed underneath the protocol.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnexpectedTag(tag) => {
                Self::ProtocolViolation(format!("clients may not send {tag:?}"))
            }
            other => Self::MalformedMessage(other.to_string()),
        }
    }
}

impl From<BroadcastError> for SessionError {
    fn from(err: BroadcastError) -> Self {
        Self::HubUnavailable(err.to_string())
    }
}

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The initial scene could not be built.
    #[error("scene error: {source}")]
    Scene {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },

    /// The listener failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: ServerError,
    },
}

#[cfg(test)]
mod tests {
    use noodles_types::MessageTag;

    use super::*;

    #[test]
    fn server_only_tags_are_protocol_violations() {
        let err = SessionError::from(CodecError::UnexpectedTag(MessageTag::CreateDelta));
        assert!(matches!(err, SessionError::ProtocolViolation(_)));
    }

    #[test]
    fn unknown_tags_are_malformed() {
        let err = SessionError::from(CodecError::UnknownTag(42));
        assert!(matches!(err, SessionError::MalformedMessage(_)));
    }
}
