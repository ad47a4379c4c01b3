//! # Runtime Error Types
//!
//! All errors that can occur while starting, driving or reloading a runtime.

use thiserror::Error;

use tessera_core::{ScheduleError, SchedulerError, WorldError};

/// Errors raised by the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// World operation failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// Worker pool failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// System ordering could not be resolved.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Reload snapshot could not be encoded or decoded.
    #[error("snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// File access failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// An owning thread could not be started or panicked.
    #[error("thread failure: {0}")]
    Thread(String),

    /// A game plugin reported a failure.
    #[error("plugin {plugin}: {reason}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// What went wrong.
        reason: String,
    },
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
