//! # Core Error Types
//!
//! All errors that can occur while registering types, mutating the world,
//! ordering systems or waiting on the task scheduler.
//!
//! Lookups never fail loudly: an unknown name, an absent component or a stale
//! weak reference resolves to `None`. The variants below are reserved for
//! caller mistakes and for configuration limits.

use thiserror::Error;

use crate::tasks::TaskId;

/// Errors raised by the world (registry, arenas, entity store, queries).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The Rust type was never registered with this world.
    #[error("type not registered: {0}")]
    NotRegistered(&'static str),

    /// A different Rust type already claimed this name.
    #[error("type name already registered by another type: {0}")]
    NameCollision(String),

    /// The component mask has no free bit left.
    #[error("too many component types: limit is {limit}")]
    TooManyComponentTypes {
        /// Width of the component mask.
        limit: usize,
    },

    /// Registration attempted after the first object was allocated.
    #[error("registration closed, objects already exist: cannot register {0}")]
    RegistrationClosed(String),

    /// A property descriptor does not fit inside its type.
    #[error("invalid property {property} on {type_name}: {reason}")]
    InvalidDescriptor {
        /// Owning type.
        type_name: String,
        /// Offending property.
        property: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Component alignment exceeds what arena blocks provide.
    #[error("{type_name} requires alignment {align}, arenas support at most 16")]
    UnsupportedAlignment {
        /// Offending type.
        type_name: String,
        /// Requested alignment.
        align: usize,
    },

    /// The reference is dead, recycled, or belongs to another world.
    #[error("stale or foreign object reference")]
    StaleReference,

    /// The reference does not point at an entity.
    #[error("reference is not an entity")]
    NotAnEntity,

    /// The reference does not point at a component.
    #[error("reference is not a component")]
    NotAComponent,

    /// The component is already attached to an entity.
    #[error("component is already attached to an entity")]
    AlreadyAttached,

    /// The entity already holds a component of this type.
    #[error("entity already holds a {0}")]
    DuplicateComponent(String),

    /// The component is not attached to this entity.
    #[error("component is not attached to this entity")]
    NotAttached,

    /// The same component type appears twice in one query.
    #[error("query names the same component type more than once")]
    DuplicateQueryComponent,

    /// The component type has no property with this name.
    #[error("{type_name} has no property {property}")]
    PropertyNotFound {
        /// Owning type.
        type_name: String,
        /// Requested property.
        property: String,
    },

    /// A value cannot be stored in the property's declared kind.
    #[error("value does not fit property {property} of kind {kind}")]
    PropertyTypeMismatch {
        /// Target property.
        property: String,
        /// Declared kind.
        kind: String,
    },

    /// Parallel iteration failed inside the task scheduler.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised by the task scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    /// A range callback panicked; the remaining ranges still ran.
    #[error("task {0:?} panicked on a worker thread")]
    TaskPanicked(TaskId),

    /// The task id is neither in flight nor completed.
    #[error("unknown task {0:?}")]
    UnknownTask(TaskId),
}

/// Errors raised while ordering systems.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// `before` constraints form a cycle.
    #[error("system ordering cycle between: {}", systems.join(", "))]
    Cycle {
        /// Systems left unordered, in registration order.
        systems: Vec<String>,
    },

    /// Two systems share a name.
    #[error("system registered twice: {0}")]
    DuplicateSystem(String),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
