//! Delta events produced by registry mutations.
//!
//! Each mutation of the registry yields exactly one [`DeltaEvent`] carrying
//! the global sequence number assigned to it. Converting an event into a
//! [`ServerMessage`] is the only way deltas reach the wire, so the tag a
//! client sees always matches the event type recorded here.

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentKind, ComponentRef};
use crate::ids::IDGroup;
use crate::message::{DeltaPayload, ServerMessage};

/// The mutation a delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaType {
    /// A component came into existence.
    Create,
    /// A live component's name or attributes changed.
    Update,
    /// A component was destroyed and its slot freed.
    Delete,
}

/// An immutable, globally sequenced record of one registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEvent {
    /// Global sequence number, strictly increasing across all kinds.
    pub seq: u64,
    /// Kind of the affected component.
    pub kind: ComponentKind,
    /// What happened.
    pub event: DeltaType,
    /// Identifier of the affected component.
    pub id: IDGroup,
    /// Component state after the mutation; `None` for deletes.
    pub component: Option<Component>,
}

impl DeltaEvent {
    /// Fully qualified reference to the affected component.
    pub const fn target(&self) -> ComponentRef {
        ComponentRef::new(self.kind, self.id)
    }

    /// Project this event onto its wire message.
    pub fn into_message(self) -> ServerMessage {
        let payload = DeltaPayload {
            seq: self.seq,
            kind: self.kind,
            id: self.id,
            component: self.component,
        };
        match self.event {
            DeltaType::Create => ServerMessage::CreateDelta(payload),
            DeltaType::Update => ServerMessage::UpdateDelta(payload),
            DeltaType::Delete => ServerMessage::DeleteDelta(payload),
        }
    }
}
