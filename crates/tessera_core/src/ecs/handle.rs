//! # Object References
//!
//! Identity-based handles. A reference names `(world, type, slot,
//! generation)` and is re-resolved on every access: if the slot died or was
//! recycled since the reference was taken, resolution yields `None`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use super::Entity;
use crate::memory::SlotId;
use crate::reflect::TypeIndex;

/// Identity of the world that issued a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StoreId(pub(crate) u32);

impl StoreId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Type-erased weak reference to any stored object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    store: StoreId,
    type_index: TypeIndex,
    slot: SlotId,
    generation: u32,
}

impl ObjectRef {
    pub(crate) const fn new(store: StoreId, type_index: TypeIndex, slot: SlotId, generation: u32) -> Self {
        Self {
            store,
            type_index,
            slot,
            generation,
        }
    }

    /// World that issued this reference.
    #[inline]
    #[must_use]
    pub const fn store(self) -> StoreId {
        self.store
    }

    /// Type of the referent.
    #[inline]
    #[must_use]
    pub const fn type_index(self) -> TypeIndex {
        self.type_index
    }

    /// Slot of the referent.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> SlotId {
        self.slot
    }

    /// Generation the slot had when the reference was taken.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Whether the referent is an entity.
    #[inline]
    #[must_use]
    pub const fn is_entity(self) -> bool {
        self.type_index.is_entity()
    }
}

/// Typed weak reference.
///
/// `Copy` and thread-safe regardless of `T`: it is only an identity.
pub struct WeakRef<T> {
    raw: ObjectRef,
    _type: PhantomData<fn() -> T>,
}

/// Weak reference to an entity.
pub type EntityId = WeakRef<Entity>;

impl<T> WeakRef<T> {
    pub(crate) const fn from_raw(raw: ObjectRef) -> Self {
        Self {
            raw,
            _type: PhantomData,
        }
    }

    /// Erases the type.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> ObjectRef {
        self.raw
    }

    /// Slot of the referent.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> SlotId {
        self.raw.slot
    }

    /// Generation the slot had when the reference was taken.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.raw.generation
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WeakRef<T> {}

impl<T> PartialEq for WeakRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for WeakRef<T> {}

impl<T> Hash for WeakRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "WeakRef<{short}>({}#{})", self.raw.slot, self.raw.generation)
    }
}

impl<T> From<WeakRef<T>> for ObjectRef {
    fn from(weak: WeakRef<T>) -> Self {
        weak.raw
    }
}
