//! The authoritative component store.
//!
//! The [`Registry`] is the only place components are created, changed, or
//! destroyed. Every successful mutation is assigned the next value of one
//! global sequence counter and published through the registry's
//! [`Broadcaster`] before the mutating call returns, so subscribers see
//! mutations in exactly the order the registry applied them.
//!
//! # Design
//!
//! - **Per-kind tables**: `kind -> slot -> component`. Freed slots hold no
//!   entry; the allocator remembers their generation.
//! - **Generation-checked access**: every lookup compares the caller's
//!   generation with the stored one, so a stale [`ComponentRef`] never
//!   resolves to the newer component occupying its slot.
//! - **Deterministic snapshot**: live components ordered by kind
//!   declaration order, then slot.

use std::collections::BTreeMap;

use noodles_types::{
    ArgDoc, Component, ComponentKind, ComponentRef, DeltaEvent, DeltaPayload, DeltaType, IDGroup,
    ServerMessage, SessionId, SignalEvent, Value,
};
use tokio::sync::mpsc::Sender;
use tracing::debug;

use crate::allocator::{AllocError, IdAllocator};
use crate::broadcast::{BroadcastError, Broadcaster};

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The reference is unknown, stale, or already deleted.
    #[error("component {0} not found")]
    NotFound(ComponentRef),

    /// The kind's ID table cannot grow any further.
    #[error("allocator exhausted for {0}")]
    AllocatorExhausted(ComponentKind),

    /// A required argument follows an optional one.
    #[error("`{0}` lists a required argument after an optional one")]
    MisorderedArgs(String),
}

impl From<AllocError> for RegistryError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::Exhausted { kind } => Self::AllocatorExhausted(kind),
            AllocError::NotAllocated { kind, id } => Self::NotFound(ComponentRef::new(kind, id)),
        }
    }
}

#[derive(Debug)]
struct Entry {
    component: Component,
    /// Sequence number of the last mutation that touched this component.
    last_seq: u64,
}

/// Typed store of live components with delta publication.
#[derive(Debug, Default)]
pub struct Registry {
    allocator: IdAllocator,
    tables: BTreeMap<ComponentKind, BTreeMap<u32, Entry>>,
    last_seq: u64,
    broadcaster: Broadcaster,
}

impl Registry {
    /// Create an empty registry with unbounded ID tables.
    pub const fn new() -> Self {
        Self::with_allocator(IdAllocator::new())
    }

    /// Create an empty registry backed by `allocator`.
    pub const fn with_allocator(allocator: IdAllocator) -> Self {
        Self {
            allocator,
            tables: BTreeMap::new(),
            last_seq: 0,
            broadcaster: Broadcaster::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a component and publish a Create delta.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AllocatorExhausted`] if no ID is available.
    pub fn create(
        &mut self,
        kind: ComponentKind,
        name: impl Into<String>,
        attributes: Value,
    ) -> Result<IDGroup, RegistryError> {
        self.insert(kind, name.into(), attributes, Vec::new())
    }

    /// Create a method component with argument documentation.
    ///
    /// Binding a delegate to it is the dispatcher's job.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MisorderedArgs`] if a required argument
    /// follows an optional one, or [`RegistryError::AllocatorExhausted`] if
    /// no ID is available.
    pub fn create_method(
        &mut self,
        name: impl Into<String>,
        arg_doc: Vec<ArgDoc>,
    ) -> Result<IDGroup, RegistryError> {
        self.insert_invocable(ComponentKind::Method, name.into(), arg_doc)
    }

    /// Create a signal component with argument documentation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MisorderedArgs`] if a required argument
    /// follows an optional one, or [`RegistryError::AllocatorExhausted`] if
    /// no ID is available.
    pub fn create_signal(
        &mut self,
        name: impl Into<String>,
        arg_doc: Vec<ArgDoc>,
    ) -> Result<IDGroup, RegistryError> {
        self.insert_invocable(ComponentKind::Signal, name.into(), arg_doc)
    }

    fn insert_invocable(
        &mut self,
        kind: ComponentKind,
        name: String,
        arg_doc: Vec<ArgDoc>,
    ) -> Result<IDGroup, RegistryError> {
        if !ArgDoc::well_ordered(&arg_doc) {
            return Err(RegistryError::MisorderedArgs(name));
        }
        self.insert(kind, name, Value::Null, arg_doc)
    }

    fn insert(
        &mut self,
        kind: ComponentKind,
        name: String,
        attributes: Value,
        arg_doc: Vec<ArgDoc>,
    ) -> Result<IDGroup, RegistryError> {
        let id = self.allocator.allocate(kind)?;
        let component = Component {
            id,
            kind,
            name,
            attributes,
            arg_doc,
        };
        let seq = next_seq(&mut self.last_seq);
        debug!(seq, %kind, %id, name = %component.name, "component created");

        self.tables.entry(kind).or_default().insert(
            id.slot,
            Entry {
                component: component.clone(),
                last_seq: seq,
            },
        );
        self.publish(DeltaEvent {
            seq,
            kind,
            event: DeltaType::Create,
            id,
            component: Some(component),
        });
        Ok(id)
    }

    /// Replace a live component's attributes and publish an Update delta.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `target` is unknown or stale.
    pub fn update(&mut self, target: ComponentRef, attributes: Value) -> Result<(), RegistryError> {
        self.modify(target, |component| component.attributes = attributes)
    }

    /// Rename a live component and publish an Update delta.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `target` is unknown or stale.
    pub fn rename(&mut self, target: ComponentRef, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        self.modify(target, |component| component.name = name)
    }

    fn modify(
        &mut self,
        target: ComponentRef,
        change: impl FnOnce(&mut Component),
    ) -> Result<(), RegistryError> {
        let entry = live_entry_mut(&mut self.tables, target)?;
        change(&mut entry.component);
        let seq = next_seq(&mut self.last_seq);
        entry.last_seq = seq;
        let component = entry.component.clone();
        debug!(seq, %target, "component updated");

        self.publish(DeltaEvent {
            seq,
            kind: target.kind,
            event: DeltaType::Update,
            id: target.id,
            component: Some(component),
        });
        Ok(())
    }

    /// Destroy a live component, free its slot, and publish a Delete delta.
    ///
    /// Deleting an unknown, stale, or already deleted reference changes
    /// nothing and publishes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `target` is not live.
    pub fn delete(&mut self, target: ComponentRef) -> Result<(), RegistryError> {
        live_entry_mut(&mut self.tables, target)?;
        self.allocator.free(target.kind, target.id)?;
        if let Some(table) = self.tables.get_mut(&target.kind) {
            table.remove(&target.id.slot);
        }
        let seq = next_seq(&mut self.last_seq);
        debug!(seq, %target, "component deleted");

        self.publish(DeltaEvent {
            seq,
            kind: target.kind,
            event: DeltaType::Delete,
            id: target.id,
            component: None,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Look up a live component.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `target` is unknown or stale,
    /// including when its slot now holds a newer component.
    pub fn get(&self, target: ComponentRef) -> Result<&Component, RegistryError> {
        self.tables
            .get(&target.kind)
            .and_then(|table| table.get(&target.id.slot))
            .map(|entry| &entry.component)
            .filter(|component| component.id.generation == target.id.generation)
            .ok_or(RegistryError::NotFound(target))
    }

    /// Whether `target` names a live component.
    pub fn contains(&self, target: ComponentRef) -> bool {
        self.get(target).is_ok()
    }

    /// First live component of `kind` called `name`, in slot order.
    pub fn find_by_name(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.tables
            .get(&kind)?
            .values()
            .map(|entry| &entry.component)
            .find(|component| component.name == name)
    }

    /// All live components ordered by kind, then slot.
    pub fn snapshot(&self) -> Vec<Component> {
        self.entries().map(|entry| entry.component.clone()).collect()
    }

    /// The snapshot as the Create deltas a joining client replays.
    ///
    /// Each message carries the sequence number of the last mutation of its
    /// component; no new sequence numbers are consumed.
    pub fn snapshot_messages(&self) -> Vec<ServerMessage> {
        self.entries()
            .map(|entry| {
                ServerMessage::CreateDelta(DeltaPayload {
                    seq: entry.last_seq,
                    kind: entry.component.kind,
                    id: entry.component.id,
                    component: Some(entry.component.clone()),
                })
            })
            .collect()
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.tables.values().flat_map(BTreeMap::values)
    }

    /// Number of live components.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Whether no components are live.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Sequence number of the most recent mutation (0 before any).
    pub const fn last_sequence(&self) -> u64 {
        self.last_seq
    }

    /// The underlying allocator, for inspection.
    pub const fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    /// Subscribe a session and queue its join-time snapshot.
    ///
    /// # Errors
    ///
    /// Propagates [`BroadcastError`] when the session cannot be admitted.
    pub fn subscribe(
        &mut self,
        session: SessionId,
        sender: Sender<ServerMessage>,
    ) -> Result<(), BroadcastError> {
        let baseline = self.snapshot_messages();
        self.broadcaster.subscribe(session, sender, baseline)
    }

    /// Remove a session from the subscriber set. Never touches components.
    pub fn unsubscribe(&mut self, session: SessionId) -> bool {
        self.broadcaster.unsubscribe(session)
    }

    /// Queue a message for a single subscriber, behind everything already
    /// published to it.
    pub fn deliver(&mut self, session: SessionId, message: ServerMessage) -> bool {
        self.broadcaster.send_to(session, message)
    }

    /// Fire a signal to every subscriber.
    ///
    /// Signals are not deltas: they change no state and consume no sequence
    /// number, but they travel in the same ordered stream.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `signal` is not a live signal.
    pub fn emit_signal(
        &mut self,
        signal: IDGroup,
        target: Option<ComponentRef>,
        args: Vec<Value>,
    ) -> Result<usize, RegistryError> {
        self.get(ComponentRef::signal(signal))?;
        let message = ServerMessage::SignalEvent(SignalEvent {
            signal,
            target,
            args,
        });
        Ok(self.broadcaster.publish(&message))
    }

    /// The subscriber set, for inspection.
    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn publish(&mut self, event: DeltaEvent) {
        let delivered = self.broadcaster.publish(&event.into_message());
        debug!(delivered, "delta published");
    }
}

fn live_entry_mut(
    tables: &mut BTreeMap<ComponentKind, BTreeMap<u32, Entry>>,
    target: ComponentRef,
) -> Result<&mut Entry, RegistryError> {
    tables
        .get_mut(&target.kind)
        .and_then(|table| table.get_mut(&target.id.slot))
        .filter(|entry| entry.component.id.generation == target.id.generation)
        .ok_or(RegistryError::NotFound(target))
}

/// Advance the global sequence counter.
///
/// The counter is a `u64` bumped once per mutation; it saturates rather
/// than wrapping.
const fn next_seq(last: &mut u64) -> u64 {
    *last = last.saturating_add(1);
    *last
}
