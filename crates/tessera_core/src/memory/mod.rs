//! # Memory Management
//!
//! Per-type object arenas. Every registered type owns one arena that stores
//! instances by value in a contiguous block, recycles dead slots through a
//! free list and grows by a fixed increment when full.
//!
//! ## Addressing
//!
//! Objects are never addressed by pointer outside a single borrow. Every
//! cross-object link is a `(type, slot, generation)` handle, so growing an
//! arena (which may move the block) needs no fix-up pass.

mod arena;
mod block;

pub use arena::{Allocation, ArenaConfig, ArenaStats, ObjectArena, ObjectHeader, SlotId, SlotStorage};
pub use block::{ByteStorage, BLOCK_ALIGN};
