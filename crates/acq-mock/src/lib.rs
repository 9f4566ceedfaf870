//! Simulated hardware for rust-acq.
//!
//! Provides a [`MockMicroscope`] that executes acquisition events without
//! real devices and a [`MemorySink`] that keeps every stored image in
//! memory. Both record what they saw so tests can assert on it afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use acq_mock::{MemorySink, MockMicroscope, MockMicroscopeConfig};
//!
//! let microscope = MockMicroscope::new(MockMicroscopeConfig::default());
//! let sink = MemorySink::new();
//! let record = sink.record();
//! ```

pub mod memory_sink;
pub mod mock_microscope;
pub mod pattern;

pub use memory_sink::{MemorySink, SinkRecord};
pub use mock_microscope::{ExecutedLog, MockMicroscope, MockMicroscopeConfig};
pub use pattern::{synthetic_frame, FrameKey};
