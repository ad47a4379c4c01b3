//! # Query Engine
//!
//! Finds entities whose mask is a superset of a requested mask, and runs
//! callbacks over the matching components.
//!
//! ## Safety Note
//!
//! Iteration hands each callback `&mut` references into several component
//! arenas at once, possibly from several worker threads. The borrow checker
//! cannot see that these never alias, so this module builds raw column views
//! and documents why each dereference is sound.

#![allow(unsafe_code)]
//!
//! ## Caching
//!
//! ```text
//!   query::<(Position, Velocity)>()
//!        │
//!        ▼
//!   cache[mask] ── version == world.version ──► Arc<[EntityId]> (shared)
//!        │
//!        └─ stale ──► scan entity arena ──► store (version, list)
//! ```
//!
//! ## Deferral
//!
//! If any type the query writes is flagged `BLOCKS_RENDER`, the iteration
//! is queued on the command queue and runs at the next sync, unless the
//! world is draining right now. Members wrapped in [`Read`] never defer.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::component::ensure_distinct;
use super::{Component, ComponentMask, ComponentSet, EntityId, ObjectRef, WeakRef, World};
use crate::error::{WorldError, WorldResult};
use crate::memory::SlotId;
use crate::reflect::TypeIndex;

/// Smallest range handed to one worker during parallel iteration.
pub const PARALLEL_MIN_RANGE: usize = 128;

// ============================================================================
// CACHE
// ============================================================================

struct CachedQuery {
    version: u32,
    entities: Arc<[EntityId]>,
}

#[derive(Default)]
pub(crate) struct QueryCache {
    entries: Mutex<HashMap<ComponentMask, CachedQuery>>,
    recomputations: AtomicU64,
    hits: AtomicU64,
}

/// Outcome of [`World::for_each`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The callback ran over `visited` entities.
    Ran {
        /// Entities visited.
        visited: usize,
    },
    /// The iteration was queued for the next sync.
    Deferred,
}

// ============================================================================
// QUERY MEMBERS
// ============================================================================

/// Read-only query member: the callback receives `&T`.
///
/// Reading a `BLOCKS_RENDER` type does not defer the iteration.
///
/// ```rust,ignore
/// world.for_each::<(Read<Sprite>, Position), _>(true, |_: EntityId, s: &Sprite, p: &mut Position| {
///     p.x = s.frame as f32;
/// })?;
/// ```
#[derive(Debug)]
pub struct Read<T>(PhantomData<fn() -> T>);

/// One element of a query tuple: a component written through `&mut T`, or
/// [`Read<T>`] for shared access.
pub trait QueryMember: Send + Sync + 'static {
    /// Stored component type.
    type Component: Component;

    /// Reference handed to the callback.
    type Item<'a>;

    /// Whether iterating this member defers to the sync window.
    const DEFERS: bool;

    /// Turns a slot pointer into the callback's reference.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live, initialised component that no other
    /// reference aliases mutably for `'a`.
    unsafe fn fetch<'a>(ptr: *mut Self::Component) -> Self::Item<'a>;
}

impl<T: Component> QueryMember for T {
    type Component = T;
    type Item<'a> = &'a mut T;

    const DEFERS: bool = T::BLOCKS_RENDER;

    #[inline]
    unsafe fn fetch<'a>(ptr: *mut T) -> &'a mut T {
        // SAFETY: forwarded from the caller contract.
        unsafe { &mut *ptr }
    }
}

impl<T: Component> QueryMember for Read<T> {
    type Component = T;
    type Item<'a> = &'a T;

    const DEFERS: bool = false;

    #[inline]
    unsafe fn fetch<'a>(ptr: *mut T) -> &'a T {
        // SAFETY: forwarded from the caller contract.
        unsafe { &*ptr }
    }
}

// ============================================================================
// COLUMN VIEW
// ============================================================================

#[derive(Clone, Copy)]
struct Column {
    base: *mut u8,
    stride: usize,
}

/// Raw view of the arenas touched by one iteration.
///
/// Only built by the query engine, for the duration of a call that holds the
/// world mutably.
pub struct ColumnView {
    columns: Vec<Column>,
}

// SAFETY: the view is only dereferenced while the owning world is borrowed
// mutably by the iterating call, and each (column, slot) pair is handed to
// exactly one callback invocation.
unsafe impl Send for ColumnView {}
// SAFETY: see above; shared access never dereferences the same slot twice.
unsafe impl Sync for ColumnView {}

impl ColumnView {
    #[inline]
    fn ptr<T>(&self, column: usize, slot: SlotId) -> *mut T {
        let c = self.columns[column];
        c.base.wrapping_add(slot as usize * c.stride).cast::<T>()
    }
}

/// Callback accepted by [`World::for_each`].
///
/// Implemented for closures `Fn(EntityId, &mut A, &B, ...)` matching the
/// query tuple, `&T` for [`Read<T>`] members. Annotate the closure
/// parameters so the types are known:
///
/// ```rust,ignore
/// world.for_each::<(Position, Velocity), _>(true, |_: EntityId, p: &mut Position, v: &mut Velocity| {
///     p.integrate(*v, dt);
/// })?;
/// ```
pub trait QueryFn<Q: ComponentSet>: Send + Sync + 'static {
    /// Invokes the callback for one entity.
    ///
    /// # Safety
    ///
    /// `columns` must hold one column per member of `Q`, in tuple order, each
    /// backed by that member's arena. Every slot in `slots` must be live in
    /// its column and not referenced anywhere else during the call.
    unsafe fn call(&self, entity: EntityId, columns: &ColumnView, slots: &[SlotId]);
}

macro_rules! impl_query_fn {
    ($($name:ident : $idx:tt),+) => {
        impl<F, $($name: QueryMember),+> QueryFn<($($name,)+)> for F
        where
            F: for<'a> Fn(EntityId, $(<$name as QueryMember>::Item<'a>),+) + Send + Sync + 'static,
        {
            #[inline]
            unsafe fn call(&self, entity: EntityId, columns: &ColumnView, slots: &[SlotId]) {
                // SAFETY: forwarded from the caller contract. Columns are
                // typed in tuple order, members name distinct component types
                // (checked by `ensure_distinct`) and therefore distinct arenas.
                unsafe {
                    (self)(
                        entity,
                        $(<$name as QueryMember>::fetch(columns.ptr::<<$name as QueryMember>::Component>($idx, slots[$idx]))),+
                    )
                }
            }
        }
    };
}

impl_query_fn!(A: 0);
impl_query_fn!(A: 0, B: 1);
impl_query_fn!(A: 0, B: 1, C: 2);
impl_query_fn!(A: 0, B: 1, C: 2, D: 3);

/// Matches of one iteration: entities plus `LEN` component slots each.
struct Matches {
    entities: Vec<EntityId>,
    slots: Vec<SlotId>,
    width: usize,
}

impl Matches {
    #[inline]
    fn slots_of(&self, i: usize) -> &[SlotId] {
        &self.slots[i * self.width..(i + 1) * self.width]
    }
}

struct ParallelPass<F> {
    matches: Matches,
    columns: ColumnView,
    callback: F,
}

// ============================================================================
// QUERIES
// ============================================================================

impl World {
    /// All live entities holding every type in `mask`, in slot order.
    ///
    /// Uncached; see [`query`](Self::query) for the cached form.
    #[must_use]
    pub fn entities_with(&self, mask: ComponentMask) -> Vec<EntityId> {
        self.entities
            .headers()
            .iter()
            .filter(|h| h.alive)
            .filter(|h| self.entities.storage()[h.slot as usize].has_components(mask))
            .map(|h| WeakRef::from_raw(ObjectRef::new(self.id, TypeIndex::ENTITY, h.slot, h.generation)))
            .collect()
    }

    /// Cached list of entities holding every type in `Q`.
    ///
    /// Recomputed only when the structural version moved since the last
    /// call for the same mask; otherwise the same shared list is returned.
    ///
    /// # Errors
    ///
    /// Returns an error for an unregistered member or a repeated type.
    pub fn query<Q: ComponentSet>(&self) -> WorldResult<Arc<[EntityId]>> {
        let mask = self.mask_of::<Q>()?;
        Ok(self.query_mask(mask))
    }

    /// Cached form of [`entities_with`](Self::entities_with).
    #[must_use]
    pub fn query_mask(&self, mask: ComponentMask) -> Arc<[EntityId]> {
        let mut cache = self.query_cache.entries.lock();
        if let Some(cached) = cache.get(&mask) {
            if cached.version == self.version {
                self.query_cache.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(&cached.entities);
            }
        }
        let entities: Arc<[EntityId]> = self.entities_with(mask).into();
        self.query_cache.recomputations.fetch_add(1, Ordering::Relaxed);
        cache.insert(
            mask,
            CachedQuery {
                version: self.version,
                entities: Arc::clone(&entities),
            },
        );
        entities
    }

    /// Number of times a cached query had to be recomputed.
    #[must_use]
    pub fn query_recomputations(&self) -> u64 {
        self.query_cache.recomputations.load(Ordering::Relaxed)
    }

    /// Number of cached queries answered without a scan.
    #[must_use]
    pub fn query_cache_hits(&self) -> u64 {
        self.query_cache.hits.load(Ordering::Relaxed)
    }

    /// Runs `callback` for every entity holding all types in `Q`.
    ///
    /// # Arguments
    ///
    /// * `parallel` - Spread contiguous ranges of matches over the workers
    /// * `callback` - Receives the entity and `&mut` to each member
    ///
    /// # Errors
    ///
    /// Returns an error for an unregistered member, a repeated type, or a
    /// panic inside a parallel callback.
    pub fn for_each<Q, F>(&mut self, parallel: bool, callback: F) -> WorldResult<Dispatch>
    where
        Q: ComponentSet,
        F: QueryFn<Q>,
    {
        self.for_each_in::<Q, F>(0..usize::MAX, parallel, callback)
    }

    /// Like [`for_each`](Self::for_each), restricted to entity slots in
    /// `range`. Used by time-sliced systems.
    ///
    /// # Errors
    ///
    /// See [`for_each`](Self::for_each).
    pub fn for_each_in<Q, F>(&mut self, range: Range<usize>, parallel: bool, callback: F) -> WorldResult<Dispatch>
    where
        Q: ComponentSet,
        F: QueryFn<Q>,
    {
        let indices = Q::type_indices(&self.registry)?;
        ensure_distinct(&indices)?;

        if Q::blocks_render() && !self.commands.is_draining() {
            self.queue_deferred(move |world: &mut World| {
                match world.run_query::<Q, F>(range, parallel, callback) {
                    Ok(visited) => trace!(visited, "deferred iteration ran"),
                    Err(error) => warn!(%error, "deferred iteration failed"),
                }
            });
            return Ok(Dispatch::Deferred);
        }

        let visited = self.run_query::<Q, F>(range, parallel, callback)?;
        Ok(Dispatch::Ran { visited })
    }

    fn collect_matches(&self, indices: &[TypeIndex], range: Range<usize>) -> WorldResult<Matches> {
        let bits = indices
            .iter()
            .map(|&i| self.registry.bit(i).ok_or(WorldError::NotAComponent))
            .collect::<WorldResult<Vec<u8>>>()?;
        let mask = bits.iter().fold(ComponentMask::EMPTY, |m, &b| m.with(b));

        let headers = self.entities.headers();
        let end = range.end.min(headers.len());
        let start = range.start.min(end);

        let mut matches = Matches {
            entities: Vec::new(),
            slots: Vec::new(),
            width: bits.len(),
        };
        for header in headers[start..end].iter().filter(|h| h.alive) {
            let record = &self.entities.storage()[header.slot as usize];
            if !record.has_components(mask) {
                continue;
            }
            let before = matches.slots.len();
            let complete = bits.iter().all(|&bit| {
                record
                    .component_at_bit(bit)
                    .map(|c| matches.slots.push(c.slot()))
                    .is_some()
            });
            if !complete {
                matches.slots.truncate(before);
                continue;
            }
            matches.entities.push(WeakRef::from_raw(ObjectRef::new(
                self.id,
                TypeIndex::ENTITY,
                header.slot,
                header.generation,
            )));
        }
        Ok(matches)
    }

    fn column_view(&mut self, indices: &[TypeIndex]) -> WorldResult<ColumnView> {
        let mut columns = Vec::with_capacity(indices.len());
        for index in indices {
            let arena = index
                .arena()
                .and_then(|a| self.components.get_mut(a))
                .ok_or(WorldError::NotAComponent)?;
            let storage = arena.storage_mut();
            columns.push(Column {
                stride: storage.stride(),
                base: storage.base_ptr(),
            });
        }
        Ok(ColumnView { columns })
    }

    /// Iterates immediately, ignoring the deferral policy.
    pub(crate) fn run_query<Q, F>(&mut self, range: Range<usize>, parallel: bool, callback: F) -> WorldResult<usize>
    where
        Q: ComponentSet,
        F: QueryFn<Q>,
    {
        let indices = Q::type_indices(&self.registry)?;
        let matches = self.collect_matches(&indices, range)?;
        let count = matches.entities.len();
        if count == 0 {
            return Ok(0);
        }
        let columns = self.column_view(&indices)?;

        if !parallel {
            for (i, &entity) in matches.entities.iter().enumerate() {
                // SAFETY: `columns` was built from `Q::type_indices` in tuple
                // order and `self` stays mutably borrowed for the loop, so no
                // arena can grow or be read elsewhere. Every slot came from a
                // live entity record, and a component has at most one owner,
                // so no two iterations touch the same slot.
                unsafe { <F as QueryFn<Q>>::call(&callback, entity, &columns, matches.slots_of(i)) };
            }
            return Ok(count);
        }

        let workers = self.scheduler.worker_count().max(1);
        let min_range = if count < PARALLEL_MIN_RANGE {
            PARALLEL_MIN_RANGE
        } else {
            (count / workers).max(1)
        };
        let pass = Arc::new(ParallelPass {
            matches,
            columns,
            callback,
        });
        let scheduler = Arc::clone(&self.scheduler);
        scheduler.parallel_for(0..count, min_range, move |start, end, _worker| {
            for i in start..end {
                // SAFETY: as in the sequential path. `parallel_for` returns
                // only after every range finished, while `self` is still
                // mutably borrowed, and ranges are disjoint, so each entity's
                // slots are visited by exactly one worker.
                unsafe {
                    <F as QueryFn<Q>>::call(
                        &pass.callback,
                        pass.matches.entities[i],
                        &pass.columns,
                        pass.matches.slots_of(i),
                    );
                }
            }
        })?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Position, Velocity, WorldConfig};
    use crate::memory::ArenaConfig;
    use bytemuck::{Pod, Zeroable};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Sprite {
        frame: u32,
    }

    impl Component for Sprite {
        const NAME: &'static str = "Sprite";
        const BLOCKS_RENDER: bool = true;
    }

    fn world() -> World {
        let config = WorldConfig {
            components: ArenaConfig::new(64, 64),
            ..WorldConfig::default()
        }
        .with_worker_threads(2);
        let mut world = World::new(config).unwrap();
        world.register_component::<Position>().unwrap();
        world.register_component::<Velocity>().unwrap();
        world.register_component::<Sprite>().unwrap();
        world
    }

    fn spawn_moving(world: &mut World, x: f32) -> EntityId {
        let entity = world.spawn();
        let p = world.create_with(Position::new(x, 0.0)).unwrap();
        let v = world.create_with(Velocity::new(1.0, 2.0)).unwrap();
        world.add_component(entity, p).unwrap();
        world.add_component(entity, v).unwrap();
        entity
    }

    #[test]
    fn test_entities_with_mask() {
        let mut world = world();
        let moving = spawn_moving(&mut world, 0.0);
        let still = world.spawn();
        let p = world.create::<Position>().unwrap();
        world.add_component(still, p).unwrap();

        let both = world.mask_of::<(Position, Velocity)>().unwrap();
        let position = world.mask_of::<(Position,)>().unwrap();
        assert_eq!(world.entities_with(both), vec![moving]);
        assert_eq!(world.entities_with(position), vec![moving, still]);
    }

    #[test]
    fn test_query_cache_recomputes_on_version_change() {
        let mut world = world();
        spawn_moving(&mut world, 0.0);

        let first = world.query::<(Position,)>().unwrap();
        let second = world.query::<(Position,)>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(world.query_recomputations(), 1);
        assert_eq!(world.query_cache_hits(), 1);

        spawn_moving(&mut world, 1.0);
        let third = world.query::<(Position,)>().unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(world.query_recomputations(), 2);
    }

    #[test]
    fn test_for_each_sequential() {
        let mut world = world();
        let entity = spawn_moving(&mut world, 1.0);
        let dispatch = world
            .for_each::<(Position, Velocity), _>(false, |_: EntityId, p: &mut Position, v: &mut Velocity| {
                p.integrate(*v, 1.0);
            })
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ran { visited: 1 });
        assert_eq!(world.get_component::<Position>(entity), Some(&Position::new(2.0, 2.0)));
    }

    #[test]
    fn test_for_each_parallel_visits_each_once() {
        let mut world = world();
        let entities: Vec<_> = (0..300).map(|i| spawn_moving(&mut world, i as f32)).collect();
        let visits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&visits);

        let dispatch = world
            .for_each::<(Position, Velocity), _>(true, move |_: EntityId, p: &mut Position, v: &mut Velocity| {
                p.integrate(*v, 1.0);
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ran { visited: 300 });
        assert_eq!(visits.load(Ordering::Relaxed), 300);
        for (i, entity) in entities.iter().enumerate() {
            assert_eq!(world.get_component::<Position>(*entity), Some(&Position::new(i as f32 + 1.0, 2.0)));
        }
    }

    #[test]
    fn test_blocks_render_defers() {
        let mut world = world();
        let entity = world.spawn();
        let sprite = world.create::<Sprite>().unwrap();
        world.add_component(entity, sprite).unwrap();

        let dispatch = world
            .for_each::<(Sprite,), _>(true, |_: EntityId, s: &mut Sprite| s.frame += 1)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Deferred);
        assert_eq!(world.get(sprite).unwrap().frame, 0);

        world.sync();
        assert_eq!(world.get(sprite).unwrap().frame, 1);
    }

    #[test]
    fn test_read_only_pass_runs_immediately() {
        let mut world = world();
        let entity = spawn_moving(&mut world, 0.0);
        let sprite = world.create_with(Sprite { frame: 4 }).unwrap();
        world.add_component(entity, sprite).unwrap();

        let dispatch = world
            .for_each::<(Read<Sprite>, Position), _>(false, |_: EntityId, s: &Sprite, p: &mut Position| {
                p.x = s.frame as f32;
            })
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ran { visited: 1 });
        assert_eq!(world.get_component::<Position>(entity).unwrap().x, 4.0);
        assert_eq!(world.pending_commands().modifies, 0);

        // Writing the same type still waits for the sync.
        let dispatch = world
            .for_each::<(Sprite, Read<Position>), _>(false, |_: EntityId, s: &mut Sprite, _: &Position| s.frame = 0)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Deferred);
    }

    #[test]
    fn test_read_and_write_same_type_rejected() {
        let mut world = world();
        let result = world.for_each::<(Position, Read<Position>), _>(false, |_: EntityId, _: &mut Position, _: &Position| {});
        assert_eq!(result, Err(WorldError::DuplicateQueryComponent));
    }

    #[test]
    fn test_for_each_in_range() {
        let mut world = world();
        for i in 0..10 {
            spawn_moving(&mut world, i as f32);
        }
        let dispatch = world
            .for_each_in::<(Position,), _>(2..5, false, |_: EntityId, p: &mut Position| p.y = 9.0)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ran { visited: 3 });
        let touched = world
            .live_entities()
            .filter(|e| world.get_component::<Position>(*e).is_some_and(|p| p.y == 9.0))
            .count();
        assert_eq!(touched, 3);
    }

    #[test]
    fn test_duplicate_query_rejected() {
        let mut world = world();
        let result = world.for_each::<(Position, Position), _>(false, |_: EntityId, _: &mut Position, _: &mut Position| {});
        assert_eq!(result, Err(WorldError::DuplicateQueryComponent));
    }
}
