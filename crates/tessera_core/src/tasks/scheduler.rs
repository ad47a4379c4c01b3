//! Fork-join worker pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Default bound on concurrently outstanding tasks.
pub const MAX_TASKS: usize = 64;

/// Range callback: `(start, end, worker_index)`.
pub type RangeFn = dyn Fn(usize, usize, usize) + Send + Sync;

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker count. `None` derives it from the hardware thread count.
    pub worker_threads: Option<usize>,
    /// In-flight task table size.
    pub max_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_tasks: MAX_TASKS,
        }
    }
}

/// Worker count for this machine.
///
/// Hardware threads, halved above ten, minus one reserved for the
/// presentation thread. Never less than one.
#[must_use]
pub fn default_worker_count() -> usize {
    let mut count = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    if count > 10 {
        count /= 2;
    }
    if count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Identifier of a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Handle returned by [`TaskScheduler::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "a task handle should be waited on"]
pub struct TaskHandle {
    /// `None` when the task already ran on the caller thread.
    id: Option<TaskId>,
}

impl TaskHandle {
    /// Id of the task, if it was queued.
    #[inline]
    #[must_use]
    pub const fn id(self) -> Option<TaskId> {
        self.id
    }

    /// Whether the task ran synchronously on the caller.
    #[inline]
    #[must_use]
    pub const fn ran_inline(self) -> bool {
        self.id.is_none()
    }
}

/// A parallel-for over `start..end`.
pub struct RangeTask {
    /// First index.
    pub start: usize,
    /// One past the last index.
    pub end: usize,
    /// Ranges longer than this are split into chunks of this size.
    pub min_range: usize,
    /// Callback run per chunk.
    pub func: Arc<RangeFn>,
}

impl RangeTask {
    /// Creates a task.
    ///
    /// # Arguments
    ///
    /// * `range` - Index range to cover
    /// * `min_range` - Chunk size; zero disables splitting
    /// * `func` - Called with `(start, end, worker_index)` per chunk
    pub fn new<F>(range: Range<usize>, min_range: usize, func: F) -> Self
    where
        F: Fn(usize, usize, usize) + Send + Sync + 'static,
    {
        Self {
            start: range.start,
            end: range.end,
            min_range,
            func: Arc::new(func),
        }
    }
}

/// Scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted into the table.
    pub scheduled: u64,
    /// Chunks executed by workers.
    pub chunks: u64,
    /// Tasks run on the caller because the table was full.
    pub inline_runs: u64,
    /// Chunks whose callback panicked.
    pub panics: u64,
}

struct TaskRecord {
    pending: AtomicUsize,
    panicked: AtomicBool,
}

struct Job {
    task: TaskId,
    start: usize,
    end: usize,
    func: Arc<RangeFn>,
    record: Arc<TaskRecord>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    in_flight: HashMap<TaskId, Arc<TaskRecord>>,
    completed: HashSet<TaskId>,
    next_id: u64,
    /// Ids below this were collected by `wait_for_all`.
    swept_below: u64,
    stop: bool,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    chunks: AtomicU64,
    inline_runs: AtomicU64,
    panics: AtomicU64,
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
    task_done: Condvar,
    max_tasks: usize,
    counters: Counters,
}

/// Fixed-size worker pool running fork-join range tasks.
///
/// ```text
///   schedule(0..1000, min 250) ──► [0..250][250..500][500..750][750..1000]
///                                       │      │       │        │
///                                    worker  worker  worker   worker
///                                       └──────┴───┬───┴────────┘
///                                        pending: 4 → 0 ──► completed
/// ```
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    /// Spawns the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if a thread cannot be created. Any
    /// workers already started are shut down.
    pub fn new(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let count = config.worker_threads.unwrap_or_else(default_worker_count).max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            work_available: Condvar::new(),
            task_done: Condvar::new(),
            max_tasks: config.max_tasks.max(1),
            counters: Counters::default(),
        });

        let mut scheduler = Self {
            shared,
            workers: Vec::with_capacity(count),
        };
        for index in 0..count {
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("tessera-worker-{index}"))
                .spawn(move || worker_loop(&shared, index))
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            scheduler.workers.push(handle);
        }
        info!(workers = count, max_tasks = scheduler.shared.max_tasks, "task scheduler started");
        Ok(scheduler)
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a range task.
    ///
    /// A range longer than `min_range` is split into `min_range`-sized
    /// chunks sharing the callback; the task completes when all chunks have
    /// run. If the in-flight table is full, debug builds panic (raise
    /// `max_tasks`) and release builds run the whole range on the caller.
    ///
    /// # Panics
    ///
    /// In debug builds, panics when the in-flight table is full.
    pub fn schedule(&self, task: RangeTask) -> TaskHandle {
        let chunks = chunk(task.start, task.end, task.min_range);
        let mut state = self.shared.state.lock();

        if state.in_flight.len() >= self.shared.max_tasks {
            drop(state);
            if cfg!(debug_assertions) {
                panic!("task table exhausted ({} in flight), raise max_tasks", self.shared.max_tasks);
            }
            warn!(max_tasks = self.shared.max_tasks, "task table exhausted, running inline");
            self.shared.counters.inline_runs.fetch_add(1, Ordering::Relaxed);
            (task.func)(task.start, task.end, 0);
            return TaskHandle { id: None };
        }

        let id = TaskId(state.next_id);
        state.next_id += 1;

        let record = Arc::new(TaskRecord {
            pending: AtomicUsize::new(chunks.len()),
            panicked: AtomicBool::new(false),
        });
        state.in_flight.insert(id, Arc::clone(&record));
        if chunks.is_empty() {
            state.completed.insert(id);
        }
        for (start, end) in chunks {
            state.queue.push_back(Job {
                task: id,
                start,
                end,
                func: Arc::clone(&task.func),
                record: Arc::clone(&record),
            });
        }
        drop(state);

        self.shared.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        self.shared.work_available.notify_all();
        TaskHandle { id: Some(id) }
    }

    /// Blocks until `handle`'s task completed, then forgets it.
    ///
    /// A task collected by a concurrent or earlier
    /// [`wait_for_all`](Self::wait_for_all) counts as completed; its panic,
    /// if any, was reported there.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::TaskPanicked`] if any chunk panicked
    /// - [`SchedulerError::UnknownTask`] if this task was already collected
    ///   by another `wait_for_task`, or never scheduled here
    pub fn wait_for_task(&self, handle: TaskHandle) -> SchedulerResult<()> {
        let Some(id) = handle.id else {
            return Ok(());
        };
        let mut state = self.shared.state.lock();
        while !state.completed.contains(&id) {
            if !state.in_flight.contains_key(&id) {
                if id.0 < state.swept_below {
                    return Ok(());
                }
                return Err(SchedulerError::UnknownTask(id));
            }
            self.shared.task_done.wait(&mut state);
        }
        state.completed.remove(&id);
        let record = state.in_flight.remove(&id);
        drop(state);

        match record {
            Some(r) if r.panicked.load(Ordering::Acquire) => Err(SchedulerError::TaskPanicked(id)),
            _ => Ok(()),
        }
    }

    /// Blocks until every in-flight task completed, then clears the
    /// completion records.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskPanicked`] for the first task found to
    /// have panicked; all tasks are still collected.
    pub fn wait_for_all(&self) -> SchedulerResult<()> {
        let mut state = self.shared.state.lock();
        while state.completed.len() < state.in_flight.len() {
            self.shared.task_done.wait(&mut state);
        }
        let panicked = state
            .in_flight
            .iter()
            .find(|(_, r)| r.panicked.load(Ordering::Acquire))
            .map(|(id, _)| *id);
        state.in_flight.clear();
        state.completed.clear();
        state.swept_below = state.next_id;
        drop(state);

        panicked.map_or(Ok(()), |id| Err(SchedulerError::TaskPanicked(id)))
    }

    /// Schedules `range` and waits for it.
    ///
    /// # Errors
    ///
    /// See [`wait_for_task`](Self::wait_for_task).
    pub fn parallel_for<F>(&self, range: Range<usize>, min_range: usize, func: F) -> SchedulerResult<()>
    where
        F: Fn(usize, usize, usize) + Send + Sync + 'static,
    {
        let handle = self.schedule(RangeTask::new(range, min_range, func));
        self.wait_for_task(handle)
    }

    /// Tasks scheduled but not yet collected by a wait.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            scheduled: c.scheduled.load(Ordering::Relaxed),
            chunks: c.chunks.load(Ordering::Relaxed),
            inline_runs: c.inline_runs.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
        }
    }

    /// Stops the workers after the queue drains and joins them.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.state.lock().stop = true;
        self.shared.work_available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked outside a task");
            }
        }
        info!("task scheduler stopped");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Splits `start..end` into chunks of at most `min_range`.
fn chunk(start: usize, end: usize, min_range: usize) -> Vec<(usize, usize)> {
    if start >= end {
        return Vec::new();
    }
    if min_range == 0 || end - start <= min_range {
        return vec![(start, end)];
    }
    (start..end)
        .step_by(min_range)
        .map(|s| (s, (s + min_range).min(end)))
        .collect()
}

fn worker_loop(shared: &Shared, index: usize) {
    debug!(worker = index, "worker started");
    loop {
        let job = {
            let mut state = shared.state.lock();
            while !state.stop && state.queue.is_empty() {
                shared.work_available.wait(&mut state);
            }
            match state.queue.pop_front() {
                Some(job) => job,
                None => break,
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| (job.func)(job.start, job.end, index)));
        shared.counters.chunks.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            shared.counters.panics.fetch_add(1, Ordering::Relaxed);
            job.record.panicked.store(true, Ordering::Release);
            error!(worker = index, task = ?job.task, start = job.start, end = job.end, "range callback panicked");
        }

        if job.record.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            shared.state.lock().completed.insert(job.task);
            shared.task_done.notify_all();
        }
    }
    debug!(worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler(workers: usize) -> TaskScheduler {
        TaskScheduler::new(&SchedulerConfig {
            worker_threads: Some(workers),
            max_tasks: MAX_TASKS,
        })
        .unwrap()
    }

    #[test]
    fn test_chunking() {
        assert_eq!(chunk(0, 10, 4), vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(chunk(0, 4, 4), vec![(0, 4)]);
        assert_eq!(chunk(5, 5, 4), vec![]);
        assert_eq!(chunk(0, 9, 0), vec![(0, 9)]);
    }

    #[test]
    fn test_parallel_for_covers_range_once() {
        let scheduler = scheduler(4);
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..1000).map(|_| AtomicUsize::new(0)).collect());
        let h = Arc::clone(&hits);
        scheduler
            .parallel_for(0..1000, 64, move |start, end, _| {
                for i in start..end {
                    h[i].fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_worker_index_in_range() {
        let scheduler = scheduler(3);
        let max_seen = Arc::new(AtomicUsize::new(0));
        let m = Arc::clone(&max_seen);
        scheduler
            .parallel_for(0..300, 10, move |_, _, worker| {
                m.fetch_max(worker, Ordering::Relaxed);
            })
            .unwrap();
        assert!(max_seen.load(Ordering::Relaxed) < 3);
    }

    #[test]
    fn test_wait_for_all() {
        let scheduler = scheduler(2);
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let t = Arc::clone(&total);
            let _handle = scheduler.schedule(RangeTask::new(0..100, 25, move |s, e, _| {
                t.fetch_add(e - s, Ordering::Relaxed);
            }));
        }
        scheduler.wait_for_all().unwrap();
        assert_eq!(total.load(Ordering::Relaxed), 800);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_empty_range_completes() {
        let scheduler = scheduler(1);
        let handle = scheduler.schedule(RangeTask::new(3..3, 8, |_, _, _| {}));
        scheduler.wait_for_task(handle).unwrap();
    }

    #[test]
    fn test_waiting_twice_is_unknown() {
        let scheduler = scheduler(1);
        let handle = scheduler.schedule(RangeTask::new(0..10, 0, |_, _, _| {}));
        scheduler.wait_for_task(handle).unwrap();
        assert!(matches!(
            scheduler.wait_for_task(handle),
            Err(SchedulerError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_panicking_chunk_is_reported() {
        let scheduler = scheduler(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let result = scheduler.parallel_for(0..40, 10, move |start, _, _| {
            r.fetch_add(1, Ordering::SeqCst);
            assert!(start != 20, "boom");
        });
        assert!(matches!(result, Err(SchedulerError::TaskPanicked(_))));
        // Every chunk still ran and nothing is left waiting.
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.stats().panics, 1);
    }

    #[test]
    fn test_wait_after_wait_for_all_is_completed() {
        let scheduler = scheduler(1);
        let handle = scheduler.schedule(RangeTask::new(0..10, 0, |_, _, _| {}));
        scheduler.wait_for_all().unwrap();
        scheduler.wait_for_task(handle).unwrap();
    }

    #[test]
    fn test_concurrent_wait_for_task_and_wait_for_all() {
        let scheduler = scheduler(2);
        let handle = scheduler.schedule(RangeTask::new(0..4, 1, |_, _, _| {
            thread::sleep(std::time::Duration::from_millis(20));
        }));
        thread::scope(|s| {
            let waiter = s.spawn(|| scheduler.wait_for_task(handle));
            scheduler.wait_for_all().unwrap();
            assert!(waiter.join().unwrap().is_ok());
        });
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "task table exhausted")]
    fn test_full_task_table_panics_in_debug() {
        let scheduler = TaskScheduler::new(&SchedulerConfig {
            worker_threads: Some(1),
            max_tasks: 1,
        })
        .unwrap();
        let _first = scheduler.schedule(RangeTask::new(0..10, 0, |_, _, _| {}));
        let _second = scheduler.schedule(RangeTask::new(0..10, 0, |_, _, _| {}));
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_full_task_table_runs_inline_in_release() {
        let scheduler = TaskScheduler::new(&SchedulerConfig {
            worker_threads: Some(1),
            max_tasks: 1,
        })
        .unwrap();
        let first = scheduler.schedule(RangeTask::new(0..10, 0, |_, _, _| {}));
        assert!(!first.ran_inline());

        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..50).map(|_| AtomicUsize::new(0)).collect());
        let h = Arc::clone(&hits);
        let second = scheduler.schedule(RangeTask::new(0..50, 10, move |start, end, _| {
            for i in start..end {
                h[i].fetch_add(1, Ordering::Relaxed);
            }
        }));
        assert!(second.ran_inline());
        assert!(second.id().is_none());
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert_eq!(scheduler.stats().inline_runs, 1);

        scheduler.wait_for_task(second).unwrap();
        scheduler.wait_for_task(first).unwrap();
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut scheduler = scheduler(3);
        assert_eq!(scheduler.worker_count(), 3);
        scheduler.shutdown();
        assert_eq!(scheduler.worker_count(), 0);
    }

    #[test]
    fn test_default_worker_count_positive() {
        assert!(default_worker_count() >= 1);
    }
}
