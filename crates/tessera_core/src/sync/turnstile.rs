//! # Frame Turnstile
//!
//! Two-phase handoff of a value between the simulation thread and the
//! presentation thread.
//!
//! ## Safety Note
//!
//! The value lives in an `UnsafeCell`; the phase state machine below is
//! what makes handing out `&mut T` / `&T` sound.

#![allow(unsafe_code)]
//!
//! ## Protocol
//!
//! ```text
//!              enter_simulation()               enter_presentation()
//!                     │                                  │
//!                     ▼                                  ▼
//!   ┌──────┐  ──► ┌────────────┐  drop guard   ┌──────────────┐
//!   │ Idle │      │ Simulation │ ───────────►  │ Presentation │
//!   └──────┘  ◄── └────────────┘     Idle  ◄── └──────────────┘
//!                   &mut T                          &T
//! ```
//!
//! - Phases never overlap: a guard exists for at most one side at a time.
//! - A side that just finished waits for a waiting peer before entering
//!   again, so under contention the two sides alternate. Uncontended, each
//!   side runs at its own rate.
//! - `close()` wakes every waiter; later entries return `None`.
//!
//! There is no timeout. A side that never drops its guard blocks the other
//! side forever.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

/// Which side currently holds the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nobody.
    Idle,
    /// The simulation thread, with exclusive access.
    Simulation,
    /// The presentation thread, with shared access.
    Presentation,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    last: Phase,
    simulation_waiting: bool,
    presentation_waiting: bool,
    closed: bool,
}

/// Owner of a value alternately mutated by the simulation side and read by
/// the presentation side.
pub struct FrameTurnstile<T> {
    value: UnsafeCell<T>,
    state: Mutex<State>,
    changed: Condvar,
}

// SAFETY: the value is only reached through a guard, and the phase state
// guarantees a single guard at a time. The simulation guard moves `&mut T`
// to whichever thread entered (`T: Send`); a presentation guard can be
// shared, exposing `&T` to several threads (`T: Sync`).
unsafe impl<T: Send + Sync> Sync for FrameTurnstile<T> {}

impl<T> FrameTurnstile<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            state: Mutex::new(State {
                phase: Phase::Idle,
                last: Phase::Idle,
                simulation_waiting: false,
                presentation_waiting: false,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Blocks until the simulation phase can begin.
    ///
    /// Returns `None` once the turnstile is closed.
    pub fn enter_simulation(&self) -> Option<SimulationGuard<'_, T>> {
        let mut state = self.state.lock();
        state.simulation_waiting = true;
        while !state.closed
            && (state.phase != Phase::Idle
                || (state.presentation_waiting && state.last == Phase::Simulation))
        {
            self.changed.wait(&mut state);
        }
        state.simulation_waiting = false;
        if state.closed {
            self.changed.notify_all();
            return None;
        }
        state.phase = Phase::Simulation;
        Some(SimulationGuard { turnstile: self })
    }

    /// Blocks until the presentation phase can begin.
    ///
    /// Returns `None` once the turnstile is closed.
    pub fn enter_presentation(&self) -> Option<PresentationGuard<'_, T>> {
        let mut state = self.state.lock();
        state.presentation_waiting = true;
        while !state.closed
            && (state.phase != Phase::Idle
                || (state.simulation_waiting && state.last == Phase::Presentation))
        {
            self.changed.wait(&mut state);
        }
        state.presentation_waiting = false;
        if state.closed {
            self.changed.notify_all();
            return None;
        }
        state.phase = Phase::Presentation;
        Some(PresentationGuard { turnstile: self })
    }

    /// Closes the turnstile. Guards already held stay valid.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Direct access, available when nobody else can hold a guard.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Unwraps the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn leave(&self, phase: Phase) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.phase, phase);
        state.phase = Phase::Idle;
        state.last = phase;
        drop(state);
        self.changed.notify_all();
    }
}

impl<T: Default> Default for FrameTurnstile<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for FrameTurnstile<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameTurnstile")
            .field("phase", &state.phase)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

/// Exclusive access held by the simulation side.
pub struct SimulationGuard<'a, T> {
    turnstile: &'a FrameTurnstile<T>,
}

impl<T> Deref for SimulationGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: phase is Simulation for the guard's lifetime; no other
        // guard exists.
        unsafe { &*self.turnstile.value.get() }
    }
}

impl<T> DerefMut for SimulationGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` rules out aliasing through this
        // guard.
        unsafe { &mut *self.turnstile.value.get() }
    }
}

impl<T> Drop for SimulationGuard<'_, T> {
    fn drop(&mut self) {
        self.turnstile.leave(Phase::Simulation);
    }
}

/// Shared access held by the presentation side.
pub struct PresentationGuard<'a, T> {
    turnstile: &'a FrameTurnstile<T>,
}

impl<T> Deref for PresentationGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: phase is Presentation for the guard's lifetime; the
        // simulation side cannot obtain `&mut T` until it ends.
        unsafe { &*self.turnstile.value.get() }
    }
}

impl<T> Drop for PresentationGuard<'_, T> {
    fn drop(&mut self) {
        self.turnstile.leave(Phase::Presentation);
    }
}
