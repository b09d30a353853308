//! Authoritative scene state for the Noodles server.
//!
//! Everything in this crate is synchronous and owned by a single writer.
//! The server crate wraps a [`Scene`] in a hub task and feeds it commands
//! from connection tasks; nothing here performs I/O beyond reading the
//! configuration file.
//!
//! # Modules
//!
//! - [`allocator`] -- Generational per-kind slot allocation
//! - [`registry`] -- Live components, global sequencing, snapshots
//! - [`broadcast`] -- Bounded per-session fan-out with eviction
//! - [`dispatch`] -- Method delegates and invocation
//! - [`builtins`] -- Methods every server exposes
//! - [`scene`] -- Registry and dispatcher bundled for the hub
//! - [`config`] -- `noodles-config.yaml` loading

pub mod allocator;
pub mod broadcast;
pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod scene;

pub use allocator::{AllocError, IdAllocator};
pub use broadcast::{BroadcastError, Broadcaster};
pub use builtins::BuiltinMethods;
pub use config::{ConfigError, ServerConfig};
pub use dispatch::{Delegate, DelegateError, Dispatcher, InvokeContext, InvokeError};
pub use registry::{Registry, RegistryError};
pub use scene::Scene;
