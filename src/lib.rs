//! # rust-acq
//!
//! Command-line front end and configuration for the acquisition engine.
//! The engine itself lives in the workspace crates:
//!
//! - **`acq-core`**: acquisition events, channels, tagged images, errors
//! - **`acq-engine`**: event tree, hardware sequencing, bounded image
//!   pipeline and the acquisition lifecycle
//! - **`acq-mock`**: simulated microscope and in-memory data sink
//!
//! This crate adds:
//!
//! - **`config`**: Figment-based [`AppConfig`](config::AppConfig) loading
//!   from TOML and `RUST_ACQ_` environment variables
//! - **`error`**: the [`AppError`](error::AppError) enum
//! - **`runner`**: simulated runs and dry-run planning
//! - **`tracing_setup`**: structured logging initialization

pub mod config;
pub mod error;
pub mod runner;
pub mod tracing_setup;

pub use acq_core;
pub use acq_engine;
pub use acq_mock;
