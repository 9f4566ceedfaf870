//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `RUST_ACQ_`, nested keys
//!    separated by a double underscore
//!    (`RUST_ACQ_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use rust_acq::config::AppConfig;
//!
//! let config = AppConfig::load_from("config/acquisition.toml")?;
//! println!("Acquisition: {}", config.engine.name);
//! # Ok::<(), rust_acq::error::AppError>(())
//! ```

use std::path::Path;

use acq_engine::{AcquisitionSettings, EngineSettings};
use acq_mock::MockMicroscopeConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Engine tuning (queue capacity, sequencing)
    #[serde(default)]
    pub engine: EngineSettings,
    /// What to acquire
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Simulated hardware used by `run`
    #[serde(default)]
    pub microscope: MockMicroscopeConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_name() -> String {
    "rust-acq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from a TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AppError::Validation(format!(
                "config file '{}' not found",
                path.display()
            )));
        }
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_ACQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        self.engine.validate().map_err(AppError::Validation)?;
        self.microscope.validate().map_err(AppError::Validation)?;
        self.acquisition.validate()?;
        Ok(())
    }
}
