//! Core types for rust-acq.
//!
//! This crate holds the data model shared by the engine, the drivers and the
//! storage side:
//!
//! - **`event`**: [`AcquisitionEvent`] and the [`EngineEvent`] sentinel union
//! - **`channel`**: channel presets and the forward channel scan
//! - **`image`**: raw frames, tagged images and the pipeline queue item
//! - **`metadata`**: tag keys and the default tag builder
//! - **`error`**: [`AcqError`], the error type used across the workspace

pub mod channel;
pub mod error;
pub mod event;
pub mod image;
pub mod metadata;

pub use channel::{ChannelGroup, ChannelSpec};
pub use error::{AcqError, AcqResult};
pub use event::{
    AcquisitionEvent, AxisName, ChannelSetting, DeviceProperty, EngineEvent, SequencedAxes,
    XyPosition, CHANNEL_AXIS, POSITION_AXIS, TIME_AXIS, Z_AXIS,
};
pub use image::{PipelineItem, RawImage, TaggedImage, Tags};
pub use metadata::{MetadataBuilder, StandardMetadata};
