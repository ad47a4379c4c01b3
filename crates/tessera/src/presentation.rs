//! # Presentation Call Queue
//!
//! Closures sent from any thread, run on the presentation thread at the start
//! of its next frame with read access to the world.
//!
//! ```text
//!   sim thread ──┐
//!   worker     ──┼──► unbounded channel ──► run_presentation_frame: drain(&world)
//!   plugin     ──┘
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use tessera_core::World;
use tracing::warn;

/// A deferred presentation-side call.
pub type PresentationCall = Box<dyn FnOnce(&World) + Send>;

/// Cloneable sending side.
#[derive(Clone)]
pub struct PresentationSender {
    tx: Sender<PresentationCall>,
}

impl PresentationSender {
    /// Queues `call`.
    ///
    /// Returns `false` if the runtime is gone.
    pub fn send<F>(&self, call: F) -> bool
    where
        F: FnOnce(&World) + Send + 'static,
    {
        if self.tx.send(Box::new(call)).is_err() {
            warn!("presentation queue closed, call dropped");
            return false;
        }
        true
    }
}

/// Channel of presentation calls.
pub struct PresentationQueue {
    tx: Sender<PresentationCall>,
    rx: Receiver<PresentationCall>,
}

impl PresentationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A handle for other threads.
    #[must_use]
    pub fn sender(&self) -> PresentationSender {
        PresentationSender { tx: self.tx.clone() }
    }

    /// Runs every call queued so far. Calls queued while draining wait for
    /// the next drain.
    pub fn drain(&self, world: &World) -> usize {
        let pending = self.rx.len();
        let mut ran = 0;
        for call in self.rx.try_iter().take(pending) {
            call(world);
            ran += 1;
        }
        ran
    }

    /// Calls waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for PresentationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tessera_core::WorldConfig;

    #[test]
    fn test_drain_runs_in_order() {
        let world = World::new(WorldConfig::default().with_worker_threads(1)).unwrap();
        let queue = PresentationQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let l = Arc::clone(&log);
            assert!(queue.sender().send(move |_| l.lock().push(i)));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(&world), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_call_queued_during_drain_waits() {
        let world = World::new(WorldConfig::default().with_worker_threads(1)).unwrap();
        let queue = PresentationQueue::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let sender = queue.sender();
        let r = Arc::clone(&runs);
        sender.clone().send(move |_| {
            let r2 = Arc::clone(&r);
            sender.send(move |_| {
                r2.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(queue.drain(&world), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(queue.drain(&world), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
