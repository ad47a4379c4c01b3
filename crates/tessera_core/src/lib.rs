//! # TESSERA Core Engine
//!
//! Arena-backed Entity Component System shared between a simulation thread
//! and a presentation thread:
//! - Per-type object arenas with slot recycling and generation-checked handles
//! - Bitmask component index with O(1) component lookup
//! - Cached queries with sequential or fork-join parallel iteration
//! - A deferred command queue applied at one sync point per frame
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not pointers** - objects reference each other by `(type, slot, generation)`
//! 2. **One structural writer** - only the simulation phase mutates the world
//! 3. **Everything else is queued** - other threads append commands
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{EntityId, Position, Velocity, World, WorldConfig};
//!
//! let mut world = World::new(WorldConfig::default())?;
//! world.register_component::<Position>()?;
//! world.register_component::<Velocity>()?;
//!
//! let entity = world.spawn();
//! let position = world.create_with(Position::new(0.0, 0.0))?;
//! world.add_component(entity, position)?;
//!
//! world.for_each::<(Position, Velocity), _>(true, |_: EntityId, p: &mut Position, v: &mut Velocity| {
//!     p.integrate(*v, 1.0 / 60.0);
//! })?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod commands;
pub mod ecs;
pub mod error;
pub mod memory;
pub mod reflect;
pub mod reload;
pub mod sync;
pub mod system;
pub mod tasks;

pub use commands::{PendingCounts, SyncReport, WorldCommand};
pub use ecs::{
    Component, ComponentMask, ComponentSet, Dispatch, Entity, EntityId, ObjectRef, Position, QueryMember, Read,
    Velocity, WeakRef, World, WorldConfig,
};
pub use error::{ScheduleError, SchedulerError, SchedulerResult, WorldError, WorldResult};
pub use memory::{ArenaConfig, ArenaStats, SlotId};
pub use reflect::{ClassDescriptor, Name, PropertyDescriptor, PropertyKind, PropertyValue, TypeIndex, TypeRegistry};
pub use reload::{RestoreReport, WorldSnapshot};
pub use sync::{FrameTurnstile, Phase, PresentationGuard, SimulationGuard};
pub use system::{
    Affinity, FrameContext, PresentationSchedule, PresentationSystem, ScheduleBuilder, SimulationSchedule, System,
    SystemBuilder, SystemDescriptor,
};
pub use tasks::{RangeTask, SchedulerConfig, TaskHandle, TaskId, TaskScheduler};
