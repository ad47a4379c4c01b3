//! # TESSERA
//!
//! Runtime around the core engine: a simulation thread and a presentation
//! thread share one world through a frame turnstile, game logic is loaded as
//! a [`GamePlugin`] and can be swapped live.
//!
//! ## Modules
//!
//! - `runtime`: frame driver, live reload, shutdown
//! - `config`: TOML configuration
//! - `clock`: per-thread frame timing
//! - `presentation`: calls queued for the presentation thread
//! - `logging`: subscriber setup
//!
//! ## Example
//!
//! ```rust,ignore
//! let runtime = Arc::new(Runtime::new(RuntimeConfig::default(), Arc::new(MyGame))?);
//! let presentation = runtime.spawn_presentation_thread()?;
//! runtime.run_simulation_loop(Some(600));
//! runtime.request_shutdown();
//! presentation.join();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod presentation;
pub mod runtime;

// Re-export the core
pub use tessera_core as core;

pub use clock::FrameClock;
pub use config::RuntimeConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use presentation::{PresentationCall, PresentationQueue, PresentationSender};
pub use runtime::{FrameReport, GamePlugin, Runtime};
