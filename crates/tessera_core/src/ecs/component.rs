//! # Component System
//!
//! Components are plain-old-data records stored by value in per-type
//! arenas. They carry a name, an optional reflected property table and two
//! lifecycle hooks; everything else is data.

use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};

use super::query::QueryMember;
use super::EntityId;
use crate::error::{WorldError, WorldResult};
use crate::reflect::{PropertyDescriptor, PropertyKind, TypeIndex, TypeRegistry};

/// Trait for ECS components.
///
/// Components must be:
/// - `Pod`: arenas reset and copy instances byte-wise
/// - `Default`: the default instance initialises every new slot
/// - `Send + Sync`: parallel iteration hands them to worker threads
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "Health";
///
///     fn properties() -> Vec<PropertyDescriptor> {
///         vec![
///             PropertyDescriptor::new("current", PropertyKind::F32, offset_of!(Health, current)),
///             PropertyDescriptor::new("max", PropertyKind::F32, offset_of!(Health, max)),
///         ]
///     }
/// }
/// ```
pub trait Component: Pod + Default + Send + Sync + 'static {
    /// Unique type name. Decides the component's bit slot (sorted rank).
    const NAME: &'static str;

    /// Set when the presentation thread reads this type outside the
    /// turnstile. Iteration over it is then deferred to the next sync.
    const BLOCKS_RENDER: bool = false;

    /// Reflected fields, used by property access and snapshots.
    fn properties() -> Vec<PropertyDescriptor> {
        Vec::new()
    }

    /// Called after the component is attached to `entity`.
    fn on_attached(&mut self, entity: EntityId) {
        let _ = entity;
    }

    /// Called after the component is detached from `entity`, just before it
    /// is soft-deleted.
    fn on_detached(&mut self, entity: EntityId) {
        let _ = entity;
    }
}

/// A tuple of distinct component types, used to name a query.
///
/// Implemented for tuples of one to four members: `(Position,)`,
/// `(Position, Velocity)`, `(Read<Sprite>, Position)`, ...
pub trait ComponentSet: Send + Sync + 'static {
    /// Number of component types in the set.
    const LEN: usize;

    /// Type indices in tuple order.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotRegistered`] for an unknown member.
    fn type_indices(registry: &TypeRegistry) -> WorldResult<Vec<TypeIndex>>;

    /// Whether any written member defers iteration to the sync window.
    fn blocks_render() -> bool;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: QueryMember),+> ComponentSet for ($($name,)+) {
            const LEN: usize = [$(stringify!($name)),+].len();

            fn type_indices(registry: &TypeRegistry) -> WorldResult<Vec<TypeIndex>> {
                Ok(vec![$(registry.index_of::<<$name as QueryMember>::Component>()?),+])
            }

            fn blocks_render() -> bool {
                false $(|| <$name as QueryMember>::DEFERS)+
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);

/// Rejects sets that name the same type twice.
pub(crate) fn ensure_distinct(indices: &[TypeIndex]) -> WorldResult<()> {
    for (i, index) in indices.iter().enumerate() {
        if indices[..i].contains(index) {
            return Err(WorldError::DuplicateQueryComponent);
        }
    }
    Ok(())
}

// ============================================================================
// BUILT-IN COMPONENTS
// ============================================================================

/// Position component for entities.
///
/// Represents a 2D position in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate in world space.
    pub x: f32,
    /// Y coordinate in world space.
    pub y: f32,
}

impl Component for Position {
    const NAME: &'static str = "Position";

    fn properties() -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("x", PropertyKind::F32, offset_of!(Position, x)),
            PropertyDescriptor::new("y", PropertyKind::F32, offset_of!(Position, y)),
        ]
    }
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns the squared distance to another position.
    ///
    /// This avoids the sqrt call for distance comparisons.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Moves by `velocity * dt`.
    #[inline]
    pub fn integrate(&mut self, velocity: Velocity, dt: f32) {
        self.x += velocity.x * dt;
        self.y += velocity.y * dt;
    }
}

/// Velocity component for entities.
///
/// Represents movement speed in world units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X velocity component.
    pub x: f32,
    /// Y velocity component.
    pub y: f32,
}

impl Component for Velocity {
    const NAME: &'static str = "Velocity";

    fn properties() -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("x", PropertyKind::F32, offset_of!(Velocity, x)),
            PropertyDescriptor::new("y", PropertyKind::F32, offset_of!(Velocity, y)),
        ]
    }
}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}
