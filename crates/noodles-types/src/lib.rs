//! Shared type definitions for the Noodles scene server.
//!
//! This crate is the single source of truth for identifiers, component
//! records, delta events, and the wire protocol spoken between the server
//! and its clients.
//!
//! # Modules
//!
//! - [`ids`] -- Generational component IDs and session IDs
//! - [`component`] -- Component kinds, references, and records
//! - [`event`] -- Globally sequenced delta events
//! - [`message`] -- `[tag, payload]` wire messages and CBOR framing
//! - [`session`] -- Identity of a joined client

pub mod component;
pub mod event;
pub mod ids;
pub mod message;
pub mod session;

// Re-export all public types at crate root for convenience.
pub use component::{ArgDoc, ArgShape, Component, ComponentKind, ComponentRef};
pub use event::{DeltaEvent, DeltaType};
pub use ids::{IDGroup, SessionId};
pub use session::SessionInfo;
pub use message::{
    ClientMessage, CodecError, DeltaPayload, ErrorCode, IntroPayload, InvokeReply, InvokeRequest,
    MessageTag, ReplyError, ServerMessage, SignalEvent,
};

/// Opaque CBOR value used for component attributes and method arguments.
pub use serde_cbor::Value;
