//! Acquisition engine for rust-acq.
//!
//! Turns a lazy, possibly infinite description of what to acquire into
//! hardware calls and moves the resulting frames through a bounded
//! processing pipeline into storage.
//!
//! # Architecture
//!
//! - **Event tree** ([`event_tree`]): nested per-axis generators expanded
//!   depth-first into a flat event stream, one root-to-leaf path at a time
//! - **Sequencer** ([`sequencer`]): merges consecutive events into one
//!   hardware-triggered burst when the hardware allows it
//! - **Pipeline** ([`pipeline`]): bounded queues from the hardware through the
//!   processors to the data sink, with backpressure and a completion sentinel
//! - **Acquisition** ([`acquisition`]): lifecycle control (start, pause,
//!   abort, close) and two-stage completion
//!
//! # Example
//!
//! ```rust,ignore
//! use acq_engine::{Acquisition, AcquisitionSettings, EngineSettings};
//!
//! let acq = Acquisition::new(EngineSettings::default(), microscope, sink);
//! acq.start().await?;
//! acq.submit(settings.events()?)?;
//! acq.close().await?;
//! ```

pub mod acquisition;
pub mod capabilities;
pub mod event_tree;
pub mod hooks;
pub mod lifecycle;
pub mod modules;
pub mod pipeline;
pub mod plan;
pub mod processor;
pub mod sequencer;

pub use acquisition::{Acquisition, EngineSettings, EventSource};
pub use capabilities::{DataSink, HardwareExecutor, Processor};
pub use event_tree::{axis_generator, AxisGenerator, EventStream, EventTreeIterator, Fetch};
pub use hooks::{AcquisitionHook, FnHook, HookStage, ImageSavedHook};
pub use lifecycle::{AcquisitionHandle, Completion, LifecycleState};
pub use pipeline::{image_queue, AxisIndexer, ImageReceiver, ImageSender, DEFAULT_QUEUE_CAPACITY};
pub use plan::{AcqOrder, AcquisitionSettings, TimelapseSettings, ZStackSettings};
pub use processor::{ImageTransform, TransformProcessor};
pub use sequencer::{
    can_sequence, merge, Coalescer, DeviceClass, FixedCapabilities, NoSequencing,
    SequencingCapabilities,
};
