//! # Thread Handoff
//!
//! Coordination between the simulation and presentation threads.

mod turnstile;

pub use turnstile::{FrameTurnstile, Phase, PresentationGuard, SimulationGuard};
