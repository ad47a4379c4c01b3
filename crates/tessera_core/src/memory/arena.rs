//! # Object Arena
//!
//! Contiguous per-type storage with slot recycling.
//!
//! ```text
//!   headers:  [ h0 | h1 | h2 | h3 | ... | h(count-1) ]      count <= capacity
//!   storage:  [ s0 | s1 | s2 | s3 | ... | ........... ]     capacity slots
//!   free:     [ 3, 1 ]  <- popped first (LIFO)
//! ```
//!
//! Allocation order:
//! 1. pop a recycled slot from the free list, reset it to the default
//!    instance, bump its generation and mark it alive;
//! 2. otherwise, if `count == capacity`, grow the backing block by
//!    `increment` slots;
//! 3. take slot `count` and initialise it from the default instance.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ecs::ObjectRef;
use crate::reflect::Name;

/// Stable index of an object inside its arena.
pub type SlotId = u32;

/// Backing storage of an arena.
pub trait SlotStorage {
    /// Makes slots `0..capacity` addressable.
    fn reserve_slots(&mut self, capacity: usize);

    /// Overwrites a slot with the type's default instance.
    fn reset_slot(&mut self, slot: usize);
}

/// Initial size and growth step of an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Slots reserved up front.
    pub capacity: usize,
    /// Slots added on each growth. Zero is treated as one.
    pub increment: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            increment: 10_000,
        }
    }
}

impl ArenaConfig {
    /// Creates a config.
    #[must_use]
    pub const fn new(capacity: usize, increment: usize) -> Self {
        Self { capacity, increment }
    }
}

/// Bookkeeping for one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Slot id, never changes.
    pub slot: SlotId,
    /// Incremented each time the slot is recycled.
    pub generation: u32,
    /// False once soft-deleted.
    pub alive: bool,
    /// Entity a component is attached to.
    pub owner: Option<ObjectRef>,
}

/// Outcome of [`ObjectArena::allocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Slot handed out.
    pub slot: SlotId,
    /// Generation the slot now carries.
    pub generation: u32,
    /// Whether the slot came from the free list.
    pub recycled: bool,
    /// Whether the arena had to grow first.
    pub grew: bool,
}

/// Counters for one arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Slots ever handed out (`count`).
    pub slots: usize,
    /// Slots currently alive.
    pub live: usize,
    /// Dead slots waiting on the free list.
    pub free: usize,
    /// Reserved slots.
    pub capacity: usize,
    /// Number of growth events.
    pub growths: u32,
}

/// Growable, recycling arena of one object type.
pub struct ObjectArena<S> {
    type_name: Name,
    storage: S,
    headers: Vec<ObjectHeader>,
    free_list: Vec<SlotId>,
    capacity: usize,
    increment: usize,
    growths: u32,
}

impl<S: SlotStorage> ObjectArena<S> {
    /// Creates an arena and reserves `config.capacity` slots.
    ///
    /// # Arguments
    ///
    /// * `type_name` - Name used in diagnostics
    /// * `storage` - Empty backing storage
    /// * `config` - Initial capacity and growth step
    #[must_use]
    pub fn new(type_name: Name, mut storage: S, config: ArenaConfig) -> Self {
        storage.reserve_slots(config.capacity);
        Self {
            type_name,
            storage,
            headers: Vec::with_capacity(config.capacity),
            free_list: Vec::new(),
            capacity: config.capacity,
            increment: config.increment.max(1),
            growths: 0,
        }
    }

    /// Hands out a slot initialised to the default instance.
    ///
    /// Never fails: a full arena grows instead.
    ///
    /// # Panics
    ///
    /// Panics if the arena would exceed `u32::MAX` slots.
    pub fn allocate(&mut self) -> Allocation {
        if let Some(slot) = self.free_list.pop() {
            self.storage.reset_slot(slot as usize);
            let header = &mut self.headers[slot as usize];
            header.alive = true;
            header.generation = header.generation.wrapping_add(1);
            header.owner = None;
            debug!(type_name = %self.type_name, slot, "recycled slot");
            return Allocation {
                slot,
                generation: header.generation,
                recycled: true,
                grew: false,
            };
        }

        let mut grew = false;
        if self.headers.len() == self.capacity {
            self.grow();
            grew = true;
        }

        let slot = SlotId::try_from(self.headers.len()).expect("arena exceeds u32::MAX slots");
        self.storage.reset_slot(slot as usize);
        self.headers.push(ObjectHeader {
            slot,
            generation: 0,
            alive: true,
            owner: None,
        });
        Allocation {
            slot,
            generation: 0,
            recycled: false,
            grew,
        }
    }

    fn grow(&mut self) {
        let old = self.capacity;
        self.capacity += self.increment;
        self.storage.reserve_slots(self.capacity);
        self.headers.reserve_exact(self.capacity - self.headers.len());
        self.growths += 1;
        debug!(
            type_name = %self.type_name,
            from = old,
            to = self.capacity,
            "arena grew"
        );
    }

    /// Marks a live slot dead and pushes it on the free list.
    ///
    /// Returns `false` if the slot was already dead or out of range.
    pub fn release(&mut self, slot: SlotId) -> bool {
        match self.headers.get_mut(slot as usize) {
            Some(header) if header.alive => {
                header.alive = false;
                header.owner = None;
                self.free_list.push(slot);
                true
            }
            _ => false,
        }
    }
}

impl<S> ObjectArena<S> {
    /// Header of a live slot whose generation matches.
    #[inline]
    #[must_use]
    pub fn resolve(&self, slot: SlotId, generation: u32) -> Option<&ObjectHeader> {
        self.headers
            .get(slot as usize)
            .filter(|h| h.alive && h.generation == generation)
    }

    /// Mutable header of a live slot whose generation matches.
    #[inline]
    pub fn resolve_mut(&mut self, slot: SlotId, generation: u32) -> Option<&mut ObjectHeader> {
        self.headers
            .get_mut(slot as usize)
            .filter(|h| h.alive && h.generation == generation)
    }

    /// All headers ever handed out, in slot order.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &[ObjectHeader] {
        &self.headers
    }

    /// Backing storage.
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable backing storage.
    #[inline]
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Type name used in diagnostics.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &Name {
        &self.type_name
    }

    /// Slots handed out so far, dead ones included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether no slot was ever handed out.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Reserved slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            slots: self.headers.len(),
            live: self.headers.len() - self.free_list.len(),
            free: self.free_list.len(),
            capacity: self.capacity,
            growths: self.growths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ByteStorage;

    fn arena(capacity: usize, increment: usize) -> ObjectArena<ByteStorage> {
        ObjectArena::new(
            Name::new("Test"),
            ByteStorage::new(&[9, 9, 9, 9]),
            ArenaConfig::new(capacity, increment),
        )
    }

    #[test]
    fn test_bump_allocation() {
        let mut arena = arena(4, 4);
        for expected in 0..4 {
            let a = arena.allocate();
            assert_eq!(a.slot, expected);
            assert!(!a.recycled && !a.grew);
        }
        assert_eq!(arena.storage().bytes(3), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_growth_keeps_slot_ids() {
        let mut arena = arena(2, 3);
        let a = arena.allocate();
        arena.storage_mut().bytes_mut(a.slot as usize)[0] = 42;
        arena.allocate();

        let c = arena.allocate();
        assert!(c.grew);
        assert_eq!(c.slot, 2);
        assert_eq!(arena.capacity(), 5);
        assert_eq!(arena.stats().growths, 1);

        // Data of earlier slots survives the move.
        assert!(arena.resolve(a.slot, a.generation).is_some());
        assert_eq!(arena.storage().bytes(a.slot as usize)[0], 42);
    }

    #[test]
    fn test_free_list_recycles_first() {
        let mut arena = arena(4, 4);
        let slots: Vec<_> = (0..4).map(|_| arena.allocate()).collect();
        arena.storage_mut().bytes_mut(1)[0] = 0;

        assert!(arena.release(slots[1].slot));
        assert!(!arena.release(slots[1].slot));

        let reused = arena.allocate();
        assert!(reused.recycled);
        assert!(!reused.grew);
        assert_eq!(reused.slot, 1);
        assert_eq!(reused.generation, 1);
        // Reset to the default instance.
        assert_eq!(arena.storage().bytes(1), &[9, 9, 9, 9]);
        // Old handle no longer resolves.
        assert!(arena.resolve(1, 0).is_none());
        assert!(arena.resolve(1, 1).is_some());
    }

    #[test]
    fn test_zero_increment_still_grows() {
        let mut arena = arena(0, 0);
        let a = arena.allocate();
        assert!(a.grew);
        assert_eq!(arena.capacity(), 1);
    }

    #[test]
    fn test_stats() {
        let mut arena = arena(8, 8);
        for _ in 0..5 {
            arena.allocate();
        }
        arena.release(0);
        arena.release(4);
        let stats = arena.stats();
        assert_eq!(stats.slots, 5);
        assert_eq!(stats.live, 3);
        assert_eq!(stats.free, 2);
    }
}
