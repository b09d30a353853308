//! `WebSocket` scene server for the Noodles protocol.
//!
//! This crate wires the synchronous scene from `noodles-core` to the
//! network:
//!
//! - **Hub** ([`hub`]): the single task that owns the scene and applies
//!   join, leave, and invoke commands in arrival order
//! - **Sessions** ([`session`]): one task per connection running the
//!   intro handshake and then shuttling frames between socket and hub
//! - **Transport** ([`ws`], [`router`], [`server`]): one Axum route that
//!   upgrades to a binary `WebSocket`
//!
//! # Architecture
//!
//! Connection tasks hold a [`HubHandle`] and never see scene state. Every
//! message for a client, whether a delta, a signal, or its own invocation
//! reply, is queued on that client's bounded outbound queue by the hub,
//! so per-client ordering is exactly the hub's processing order.

pub mod demo;
pub mod error;
pub mod hub;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::{AppError, SessionError};
pub use hub::{Hub, HubCommand, HubHandle};
pub use router::build_router;
pub use server::{serve, start_server, ServerError};
pub use session::{run_session, SessionConfig, SessionState};
pub use state::AppState;
