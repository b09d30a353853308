//! Generational slot allocation, one table per component kind.
//!
//! Each kind owns a growable table of slots. A slot carries the generation
//! it is currently on and whether it is in use. Freeing a slot bumps its
//! generation before the slot goes back on the free list, so any
//! [`IDGroup`] handed out earlier for that slot can never match again.
//!
//! # Invariants
//!
//! - Generations per slot never decrease and are never reset.
//! - A slot whose generation cannot be bumped without wrapping is retired
//!   instead of being reused.
//! - At most one allocation is outstanding per (kind, slot).

use std::collections::BTreeMap;

use noodles_types::{ComponentKind, IDGroup};

/// Errors raised by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The kind's table is at capacity and has no free slot.
    #[error("component table for {kind} is exhausted")]
    Exhausted {
        /// The kind whose table is full.
        kind: ComponentKind,
    },

    /// The ID does not name a currently allocated slot.
    #[error("{kind}{id} is not allocated")]
    NotAllocated {
        /// Kind of the rejected ID.
        kind: ComponentKind,
        /// The rejected ID.
        id: IDGroup,
    },
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    in_use: bool,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    in_use: usize,
}

/// Per-kind generational ID allocator.
#[derive(Debug)]
pub struct IdAllocator {
    tables: BTreeMap<ComponentKind, SlotTable>,
    max_slots: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Create an allocator whose tables may grow to `u32::MAX` slots.
    pub const fn new() -> Self {
        Self::with_capacity(u32::MAX)
    }

    /// Create an allocator whose tables hold at most `max_slots` slots each.
    pub const fn with_capacity(max_slots: u32) -> Self {
        Self {
            tables: BTreeMap::new(),
            max_slots,
        }
    }

    /// Allocate an ID for `kind`.
    ///
    /// Reuses the most recently freed slot when one is available, otherwise
    /// appends a new slot at generation 0.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::Exhausted`] when the table is at capacity and
    /// every slot is in use or retired.
    pub fn allocate(&mut self, kind: ComponentKind) -> Result<IDGroup, AllocError> {
        let table = self.tables.entry(kind).or_default();

        if let Some(slot_index) = table.free.pop() {
            if let Some(slot) = usize::try_from(slot_index)
                .ok()
                .and_then(|i| table.slots.get_mut(i))
            {
                slot.in_use = true;
                table.in_use = table.in_use.saturating_add(1);
                return Ok(IDGroup::new(slot_index, slot.generation));
            }
        }

        let slot_index = u32::try_from(table.slots.len())
            .ok()
            .filter(|index| *index < self.max_slots)
            .ok_or(AllocError::Exhausted { kind })?;

        table.slots.push(Slot {
            generation: 0,
            in_use: true,
        });
        table.in_use = table.in_use.saturating_add(1);
        Ok(IDGroup::new(slot_index, 0))
    }

    /// Release `id` so its slot can be reused under a newer generation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotAllocated`] if the slot is unknown, free, or
    /// on a different generation than `id`.
    pub fn free(&mut self, kind: ComponentKind, id: IDGroup) -> Result<(), AllocError> {
        let not_allocated = AllocError::NotAllocated { kind, id };
        let table = self.tables.get_mut(&kind).ok_or_else(|| not_allocated.clone())?;
        let slot = usize::try_from(id.slot)
            .ok()
            .and_then(|i| table.slots.get_mut(i))
            .filter(|slot| slot.in_use && slot.generation == id.generation)
            .ok_or(not_allocated)?;

        slot.in_use = false;
        table.in_use = table.in_use.saturating_sub(1);

        // A slot at the last generation is retired rather than wrapped.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            table.free.push(id.slot);
        } else {
            tracing::warn!(%kind, slot = id.slot, "retiring slot at final generation");
        }
        Ok(())
    }

    /// Whether `id` is currently allocated for `kind`.
    pub fn is_allocated(&self, kind: ComponentKind, id: IDGroup) -> bool {
        self.current_generation(kind, id.slot)
            .is_some_and(|(generation, in_use)| in_use && generation == id.generation)
    }

    /// Current generation of a slot and whether it is in use.
    pub fn current_generation(&self, kind: ComponentKind, slot: u32) -> Option<(u32, bool)> {
        let table = self.tables.get(&kind)?;
        let slot = table.slots.get(usize::try_from(slot).ok()?)?;
        Some((slot.generation, slot.in_use))
    }

    /// Number of outstanding allocations for `kind`.
    pub fn live_count(&self, kind: ComponentKind) -> usize {
        self.tables.get(&kind).map_or(0, |t| t.in_use)
    }

    /// Number of slots ever created for `kind`.
    pub fn slot_count(&self, kind: ComponentKind) -> usize {
        self.tables.get(&kind).map_or(0, |t| t.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: ComponentKind = ComponentKind::Geometry;

    #[test]
    fn fresh_slots_start_at_generation_zero() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.allocate(KIND), Ok(IDGroup::new(0, 0)));
        assert_eq!(alloc.allocate(KIND), Ok(IDGroup::new(1, 0)));
        assert_eq!(alloc.slot_count(KIND), 2);
    }

    #[test]
    fn tables_are_independent_per_kind() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.allocate(ComponentKind::Material), Ok(IDGroup::new(0, 0)));
        assert_eq!(alloc.allocate(ComponentKind::Geometry), Ok(IDGroup::new(0, 0)));
        assert_eq!(alloc.live_count(ComponentKind::Material), 1);
        assert_eq!(alloc.live_count(ComponentKind::Method), 0);
    }

    #[test]
    fn freed_slot_is_reused_with_next_generation() {
        let mut alloc = IdAllocator::new();
        let first = alloc.allocate(KIND).unwrap_or(IDGroup::new(u32::MAX, 0));
        assert_eq!(alloc.free(KIND, first), Ok(()));
        assert!(!alloc.is_allocated(KIND, first));

        let second = alloc.allocate(KIND);
        assert_eq!(second, Ok(IDGroup::new(0, 1)));
        assert_eq!(alloc.slot_count(KIND), 1);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut alloc = IdAllocator::new();
        let id = alloc.allocate(KIND).unwrap_or(IDGroup::new(u32::MAX, 0));
        assert_eq!(alloc.free(KIND, id), Ok(()));
        assert_eq!(
            alloc.free(KIND, id),
            Err(AllocError::NotAllocated { kind: KIND, id })
        );
        // The rejected free must not have bumped the generation again.
        assert_eq!(alloc.current_generation(KIND, 0), Some((1, false)));
    }

    #[test]
    fn stale_generation_cannot_free_the_new_occupant() {
        let mut alloc = IdAllocator::new();
        let old = alloc.allocate(KIND).unwrap_or(IDGroup::new(u32::MAX, 0));
        assert_eq!(alloc.free(KIND, old), Ok(()));
        let new = alloc.allocate(KIND).unwrap_or(IDGroup::new(u32::MAX, 0));
        assert!(alloc.free(KIND, old).is_err());
        assert!(alloc.is_allocated(KIND, new));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut alloc = IdAllocator::with_capacity(2);
        assert!(alloc.allocate(KIND).is_ok());
        assert!(alloc.allocate(KIND).is_ok());
        assert_eq!(alloc.allocate(KIND), Err(AllocError::Exhausted { kind: KIND }));
    }

    #[test]
    fn slot_at_final_generation_is_retired() {
        let mut alloc = IdAllocator::new();
        assert!(alloc.allocate(KIND).is_ok());
        if let Some(slot) = alloc
            .tables
            .get_mut(&KIND)
            .and_then(|t| t.slots.first_mut())
        {
            slot.generation = u32::MAX;
        }
        let last = IDGroup::new(0, u32::MAX);
        assert_eq!(alloc.free(KIND, last), Ok(()));
        assert_eq!(alloc.current_generation(KIND, 0), Some((u32::MAX, false)));
        // The retired slot is skipped; a new one is appended.
        assert_eq!(alloc.allocate(KIND), Ok(IDGroup::new(1, 0)));
    }

    #[test]
    fn full_table_recovers_after_free() {
        let mut alloc = IdAllocator::with_capacity(1);
        let id = alloc.allocate(KIND).unwrap_or(IDGroup::new(u32::MAX, 0));
        assert!(alloc.allocate(KIND).is_err());
        assert_eq!(alloc.free(KIND, id), Ok(()));
        assert_eq!(alloc.allocate(KIND), Ok(IDGroup::new(0, 1)));
    }
}
