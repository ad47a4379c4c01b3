//! # Entity Component System
//!
//! Arena-backed ECS with bitmask queries.
//!
//! ## Design Philosophy
//!
//! - One arena per registered type, instances stored by value
//! - Entities are records listing their components in sorted name order
//! - A 64-bit mask per entity answers "has components" in one AND
//! - Every cross-object link is a generation-checked handle

mod component;
mod entity;
mod handle;
mod query;
mod world;

pub use component::{Component, ComponentSet, Position, Velocity};
pub use entity::{ComponentMask, Entity};
pub use handle::{EntityId, ObjectRef, StoreId, WeakRef};
pub use query::{ColumnView, Dispatch, QueryFn, QueryMember, Read, PARALLEL_MIN_RANGE};
pub use world::{World, WorldConfig};
