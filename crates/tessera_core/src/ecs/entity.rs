//! # Entity Records
//!
//! An entity is a record in the entity arena holding:
//! - the sorted names of its component types
//! - a parallel list of component references in the same order
//! - a bitmask with one bit per registered component type
//!
//! Because bit slots are ranks in the globally sorted name list, the index of
//! a component in the parallel list equals the number of mask bits below its
//! own bit. Lookup by type is therefore a popcount, not a scan.
//!
//! ```text
//!   registered: Health(0) Position(1) Sprite(2) Velocity(3)
//!   entity:     names      = [Position, Velocity]
//!               components = [p#12,     v#7     ]
//!               mask       = 0b1010
//!   Velocity -> rank(3) = popcount(0b1010 & 0b0111) = 1 -> v#7
//! ```

use super::ObjectRef;
use crate::error::{WorldError, WorldResult};
use crate::memory::SlotStorage;
use crate::reflect::Name;

/// Set of component bit slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ComponentMask(u64);

impl ComponentMask {
    /// Number of available bit slots.
    pub const WIDTH: usize = 64;

    /// No components.
    pub const EMPTY: Self = Self(0);

    /// Builds a mask from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns the mask with `bit` set.
    #[inline]
    #[must_use]
    pub const fn with(self, bit: u8) -> Self {
        Self(self.0 | (1u64 << bit))
    }

    /// Returns the mask with `bit` cleared.
    #[inline]
    #[must_use]
    pub const fn without(self, bit: u8) -> Self {
        Self(self.0 & !(1u64 << bit))
    }

    /// Whether `bit` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, bit: u8) -> bool {
        self.0 & (1u64 << bit) != 0
    }

    /// Whether every bit of `other` is set here.
    #[inline]
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of set bits.
    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Number of set bits strictly below `bit`.
    #[inline]
    #[must_use]
    pub const fn rank(self, bit: u8) -> usize {
        (self.0 & ((1u64 << bit) - 1)).count_ones() as usize
    }
}

/// Component bookkeeping of one entity.
#[derive(Clone, Debug, Default)]
pub struct Entity {
    names: Vec<Name>,
    components: Vec<ObjectRef>,
    mask: ComponentMask,
}

impl Entity {
    /// Type name of the built-in entity type.
    pub const TYPE_NAME: &'static str = "Entity";

    /// Mask of held component types.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> ComponentMask {
        self.mask
    }

    /// Held component type names, sorted.
    #[inline]
    #[must_use]
    pub fn component_names(&self) -> &[Name] {
        &self.names
    }

    /// Held components, parallel to [`component_names`](Self::component_names).
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[ObjectRef] {
        &self.components
    }

    /// Number of held components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the entity holds no component.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether every type of `mask` is held.
    #[inline]
    #[must_use]
    pub const fn has_components(&self, mask: ComponentMask) -> bool {
        self.mask.contains_all(mask)
    }

    /// Component stored under `bit`, in O(1).
    #[inline]
    #[must_use]
    pub fn component_at_bit(&self, bit: u8) -> Option<ObjectRef> {
        if !self.mask.contains(bit) {
            return None;
        }
        self.components.get(self.mask.rank(bit)).copied()
    }

    /// Sorted insert. Rejects a second component of the same type.
    pub(crate) fn insert(&mut self, name: Name, bit: u8, component: ObjectRef) -> WorldResult<usize> {
        match self.names.binary_search(&name) {
            Ok(_) => Err(WorldError::DuplicateComponent(name.to_string())),
            Err(position) => {
                debug_assert_eq!(position, self.mask.rank(bit));
                self.names.insert(position, name);
                self.components.insert(position, component);
                self.mask = self.mask.with(bit);
                Ok(position)
            }
        }
    }

    /// Removes `component` if held. Linear scan by identity.
    pub(crate) fn remove(&mut self, component: ObjectRef, bit: u8) -> bool {
        let Some(position) = self.components.iter().position(|c| *c == component) else {
            return false;
        };
        self.components.remove(position);
        self.names.remove(position);
        self.mask = self.mask.without(bit);
        true
    }

    /// Detaches everything, returning the former components.
    pub(crate) fn take_components(&mut self) -> Vec<ObjectRef> {
        self.names.clear();
        self.mask = ComponentMask::EMPTY;
        std::mem::take(&mut self.components)
    }
}

impl SlotStorage for Vec<Entity> {
    fn reserve_slots(&mut self, capacity: usize) {
        if capacity > self.len() {
            self.reserve_exact(capacity - self.len());
            self.resize_with(capacity, Entity::default);
        }
    }

    fn reset_slot(&mut self, slot: usize) {
        let entity = &mut self[slot];
        entity.names.clear();
        entity.components.clear();
        entity.mask = ComponentMask::EMPTY;
    }
}
