//! # Runtime Configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid:
//!
//! ```toml
//! simulation_fps = 60
//! presentation_fps = 120
//! log_level = "info"
//!
//! [world.entities]
//! capacity = 10000
//! increment = 10000
//!
//! [world.scheduler]
//! worker_threads = 4
//! max_tasks = 64
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_core::WorldConfig;
use tracing::{info, Level};

use crate::error::RuntimeResult;

/// Configuration of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// World sizing and worker pool.
    pub world: WorldConfig,
    /// Simulation frame rate cap. Zero runs unpaced.
    pub simulation_fps: u32,
    /// Presentation frame rate cap. Zero runs unpaced.
    pub presentation_fps: u32,
    /// Maximum log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            simulation_fps: 60,
            presentation_fps: 60,
            log_level: "info".to_owned(),
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`](crate::RuntimeError::Config) for
    /// malformed input.
    pub fn from_toml_str(text: &str) -> RuntimeResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parsed [`log_level`](Self::log_level), `INFO` if unrecognised.
    #[must_use]
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}
