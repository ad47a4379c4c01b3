//! # Command Queue
//!
//! Deferred structural work, appended from any thread through `&World` and
//! applied at the single sync point of each simulation frame.
//!
//! ```text
//!   any thread                      simulation thread, inside the turnstile
//!   ──────────                      ───────────────────────────────────────
//!   queue_create ───┐
//!   queue_soft_delete ──► [creates | deletes | modifies] ──► World::sync()
//!   queue_modify ───┘                                        1. creates (until empty)
//!                                                            2. deletes
//!                                                            3. modifies (snapshot)
//! ```

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::ecs::{Component, EntityId, ObjectRef, WeakRef, World};

/// A deferred operation on the world.
pub type WorldCommand = Box<dyn FnOnce(&mut World) + Send>;

/// A deferred creation; returns whether the object was created.
type CreateCommand = Box<dyn FnOnce(&mut World) -> bool + Send>;

#[derive(Default)]
struct Pending {
    creates: Vec<CreateCommand>,
    deletes: Vec<ObjectRef>,
    modifies: Vec<WorldCommand>,
}

/// Lock-protected per-kind queues.
#[derive(Default)]
pub struct CommandQueue {
    pending: Mutex<Pending>,
    draining: AtomicBool,
}

/// Number of queued operations per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Queued creations.
    pub creates: usize,
    /// Queued soft-deletes.
    pub deletes: usize,
    /// Queued modifications and deferred iterations.
    pub modifies: usize,
}

/// What one sync applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Objects created by queued creations.
    pub created: usize,
    /// Queued creations that failed; their callbacks did not run.
    pub failed_creates: usize,
    /// Objects soft-deleted.
    pub deleted: usize,
    /// Deletes skipped because the target was already dead.
    pub skipped_deletes: usize,
    /// Modifications and deferred iterations run.
    pub modified: usize,
}

impl CommandQueue {
    fn push_create(&self, command: CreateCommand) {
        self.pending.lock().creates.push(command);
    }

    fn push_delete(&self, object: ObjectRef) {
        self.pending.lock().deletes.push(object);
    }

    fn push_modify(&self, command: WorldCommand) {
        self.pending.lock().modifies.push(command);
    }

    fn take_creates(&self) -> Vec<CreateCommand> {
        std::mem::take(&mut self.pending.lock().creates)
    }

    fn take_deletes(&self) -> Vec<ObjectRef> {
        std::mem::take(&mut self.pending.lock().deletes)
    }

    fn take_modifies(&self) -> Vec<WorldCommand> {
        std::mem::take(&mut self.pending.lock().modifies)
    }

    /// Counts of queued operations.
    #[must_use]
    pub fn counts(&self) -> PendingCounts {
        let pending = self.pending.lock();
        PendingCounts {
            creates: pending.creates.len(),
            deletes: pending.deletes.len(),
            modifies: pending.modifies.len(),
        }
    }

    /// Whether a sync is applying commands right now.
    #[inline]
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drops every queued operation.
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        pending.creates.clear();
        pending.deletes.clear();
        pending.modifies.clear();
    }
}

impl World {
    /// Queues creation of an entity; `then` runs with it at the next sync.
    ///
    /// Queued from inside a sync, it runs within that same sync.
    pub fn queue_create_entity<F>(&self, then: F)
    where
        F: FnOnce(&mut World, EntityId) + Send + 'static,
    {
        self.commands.push_create(Box::new(move |world: &mut World| {
            let entity = world.spawn();
            then(world, entity);
            true
        }));
    }

    /// Queues creation of a `T`; `then` runs with it at the next sync.
    ///
    /// Queued from inside a sync, it runs within that same sync.
    pub fn queue_create<T, F>(&self, then: F)
    where
        T: Component,
        F: FnOnce(&mut World, WeakRef<T>) + Send + 'static,
    {
        self.commands.push_create(Box::new(move |world: &mut World| match world.create::<T>() {
            Ok(component) => {
                then(world, component);
                true
            }
            Err(error) => {
                warn!(type_name = T::NAME, %error, "queued creation failed");
                false
            }
        }));
    }

    /// Queues a soft-delete. Dead or recycled targets are skipped.
    pub fn queue_soft_delete(&self, object: impl Into<ObjectRef>) {
        self.commands.push_delete(object.into());
    }

    /// Queues a mutation of a component. The structural version is bumped
    /// after `modify` runs; a dead target is skipped.
    pub fn queue_modify<T, F>(&self, component: WeakRef<T>, modify: F)
    where
        T: Component,
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.commands.push_modify(Box::new(move |world: &mut World| {
            if let Some(value) = world.get_mut(component) {
                modify(value);
                world.bump_version();
            } else {
                debug!(type_name = T::NAME, slot = component.slot(), "modify target is dead");
            }
        }));
    }

    /// Queues an arbitrary mutation of any live object.
    pub fn queue_modify_object<F>(&self, object: ObjectRef, modify: F)
    where
        F: FnOnce(&mut World, ObjectRef) + Send + 'static,
    {
        self.commands.push_modify(Box::new(move |world: &mut World| {
            if world.is_alive(object) {
                modify(world, object);
                world.bump_version();
            } else {
                debug!(slot = object.slot(), "modify target is dead");
            }
        }));
    }

    /// Queues work that needs the whole world, run in modify order.
    pub fn queue_deferred<F>(&self, work: F)
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        self.commands.push_modify(Box::new(work));
    }

    /// Queued operation counts.
    #[must_use]
    pub fn pending_commands(&self) -> PendingCounts {
        self.commands.counts()
    }

    /// Whether a sync is in progress.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.commands.is_draining()
    }

    /// Drops every queued operation. Used before tearing a world down for a
    /// reload.
    pub fn clear_pending_commands(&self) {
        self.commands.clear();
    }

    /// Applies queued work: creates, then deletes, then modifies.
    ///
    /// Creations queued while creates drain run in this sync. Modifies
    /// queued while modifies drain wait for the next one.
    ///
    /// # Panics
    ///
    /// Propagates a panic from a queued callback. The sync window is closed
    /// before unwinding continues. The rest of the batch being applied is
    /// dropped; kinds not yet taken stay queued.
    pub fn sync(&mut self) -> SyncReport {
        self.commands.draining.store(true, Ordering::Release);
        let result = catch_unwind(AssertUnwindSafe(|| self.drain()));
        self.commands.draining.store(false, Ordering::Release);
        match result {
            Ok(report) => report,
            Err(payload) => {
                error!("queued command panicked during sync");
                resume_unwind(payload)
            }
        }
    }

    fn drain(&mut self) -> SyncReport {
        let mut report = SyncReport::default();

        loop {
            let batch = self.commands.take_creates();
            if batch.is_empty() {
                break;
            }
            for command in batch {
                if command(self) {
                    report.created += 1;
                } else {
                    report.failed_creates += 1;
                }
            }
        }

        for object in self.commands.take_deletes() {
            if self.soft_delete(object) {
                report.deleted += 1;
            } else {
                report.skipped_deletes += 1;
                debug!(slot = object.slot(), "soft-delete target already dead");
            }
        }

        let modifies = self.commands.take_modifies();
        report.modified = modifies.len();
        for command in modifies {
            command(self);
        }

        trace!(?report, "sync applied");
        report
    }
}
