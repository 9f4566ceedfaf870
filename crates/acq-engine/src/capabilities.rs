//! Collaborator traits the engine drives.
//!
//! The engine never talks to devices or storage directly. A hardware
//! executor turns events into frames, processors transform frames in flight
//! and a data sink stores them.

use std::sync::Arc;

use acq_core::{AcqResult, AcquisitionEvent, RawImage, TaggedImage, Tags};
use async_trait::async_trait;

use crate::lifecycle::AcquisitionHandle;
use crate::pipeline::{ImageReceiver, ImageSender};
use crate::sequencer::{NoSequencing, SequencingCapabilities};

/// Executes acquisition events on the microscope.
///
/// Called from a single task per acquisition, one event at a time, in event
/// order.
#[async_trait]
pub trait HardwareExecutor: Send {
    /// Move the hardware to the event's targets and acquire its frames.
    ///
    /// A composite event must be executed as one triggered burst. Each
    /// returned frame carries the index of the burst element that produced
    /// it in [`RawImage::sequence_index`]. There is no timeout: a call that
    /// never returns stalls the acquisition.
    async fn execute(&mut self, event: &AcquisitionEvent) -> AcqResult<Vec<RawImage>>;

    /// What this hardware can run as a triggered sequence.
    fn capabilities(&self) -> Arc<dyn SequencingCapabilities> {
        Arc::new(NoSequencing)
    }

    fn name(&self) -> &str {
        "hardware"
    }
}

/// A pipeline stage between the hardware and the sink.
///
/// A processor owns both ends of its hop once attached. It must forward the
/// `Finished` sentinel (or drop its output) when its input ends, and it
/// should preserve the relative order of the images it forwards.
#[async_trait]
pub trait Processor: Send {
    fn name(&self) -> &str;

    /// Take ownership of the input and output queues and start consuming.
    async fn attach(&mut self, input: ImageReceiver, output: ImageSender) -> AcqResult<()>;

    /// Called once after the sentinel has reached the sink.
    async fn close(&mut self) -> AcqResult<()>;
}

/// Terminal storage for tagged images.
#[async_trait]
pub trait DataSink: Send {
    async fn initialize(&mut self, acquisition: &AcquisitionHandle, summary: &Tags)
        -> AcqResult<()>;

    /// Store one image. Must not return before the image is durable.
    async fn put_image(&mut self, image: &TaggedImage) -> AcqResult<()>;

    /// Called once after the last image. Returns when everything is flushed.
    async fn finished(&mut self) -> AcqResult<()>;

    fn anything_written(&self) -> bool;
}
