//! Application error type.
//!
//! `AppError` wraps the failures the command-line front end can hit:
//!
//! - **`Config`**: the configuration file or environment could not be parsed
//!   into [`AppConfig`](crate::config::AppConfig).
//! - **`Validation`**: the configuration parsed but holds impossible values.
//! - **`Acquisition`**: the engine reported an error; see [`AcqError`].
//! - **`Tracing`**: the log subscriber could not be installed.

use acq_core::AcqError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Acquisition(#[from] AcqError),

    #[error("Tracing setup error: {0}")]
    Tracing(String),
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(Box::new(e))
    }
}
