//! Identifier types.
//!
//! Components are addressed by an [`IDGroup`]: a slot within one kind's
//! table plus the generation that slot had when the component was created.
//! Because slots are reused, the generation is what makes an old reference
//! distinguishable from the newer component now living in the same slot.
//!
//! Sessions use a UUID v7 wrapper ([`SessionId`]) so log lines sort by
//! connection time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generational component identifier scoped to one component kind.
///
/// Serialized as the two-element array `[slot, generation]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct IDGroup {
    /// Index into the kind's component table.
    pub slot: u32,
    /// Reuse counter of the slot at allocation time.
    pub generation: u32,
}

impl IDGroup {
    /// Build an identifier from its parts.
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl From<(u32, u32)> for IDGroup {
    fn from((slot, generation): (u32, u32)) -> Self {
        Self { slot, generation }
    }
}

impl From<IDGroup> for (u32, u32) {
    fn from(id: IDGroup) -> Self {
        (id.slot, id.generation)
    }
}

impl core::fmt::Display for IDGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {}]", self.slot, self.generation)
    }
}

/// Unique identifier for a connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
