//! # Tasks
//!
//! A fixed pool of worker threads executing range tasks. Used by parallel
//! queries; available to game code for its own fork-join work.

mod scheduler;

pub use scheduler::{
    default_worker_count, RangeFn, RangeTask, SchedulerConfig, SchedulerStats, TaskHandle, TaskId,
    TaskScheduler, MAX_TASKS,
};
