//! Bounded image pipeline: source → processors → sink.
//!
//! Every hop is a bounded `tokio::sync::mpsc` queue. A full queue suspends
//! the upstream `send`, so a slow stage throttles everything before it
//! instead of dropping frames or growing memory.
//!
//! ```text
//! source ─▶ Q0 ─▶ P1 ─▶ Q1 ─▶ … ─▶ Pn ─▶ Qn ─▶ sink task ─▶ DataSink
//! ```
//!
//! The `Finished` sentinel travels the same queues as the images. When it
//! reaches the sink task, the processors are closed in registration order,
//! the data sink is finished and the task exits.

use std::collections::HashMap;
use std::sync::Arc;

use acq_core::metadata::{self, CHANNEL_NAME};
use acq_core::{AcqError, AcqResult, PipelineItem, Tags, CHANNEL_AXIS, POSITION_AXIS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::capabilities::{DataSink, Processor};
use crate::hooks::ImageSavedHook;
use crate::lifecycle::AcquisitionHandle;

/// Default capacity of each pipeline queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

pub type ImageSender = mpsc::Sender<PipelineItem>;
pub type ImageReceiver = mpsc::Receiver<PipelineItem>;

/// One bounded hop. A capacity of zero is raised to one.
pub fn image_queue(capacity: usize) -> (ImageSender, ImageReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Assigns channel and position axis indices in first-seen order.
///
/// The mapping lives as long as the acquisition and is never reset, so a
/// name keeps its index even when other names are seen in between.
#[derive(Debug, Default)]
pub struct AxisIndexer {
    channels: HashMap<String, i64>,
    positions: HashMap<String, i64>,
}

impl AxisIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_index(&mut self, name: &str) -> i64 {
        first_seen(&mut self.channels, name)
    }

    pub fn position_index(&mut self, name: &str) -> i64 {
        first_seen(&mut self.positions, name)
    }

    /// Write the inferred indices into the image's `Axes` tag.
    ///
    /// Images without a channel name all share channel index 0 under the
    /// empty name.
    pub fn stamp(&mut self, tags: &mut Tags) {
        let channel = metadata::channel_name(tags).unwrap_or_default().to_string();
        let index = self.channel_index(&channel);
        metadata::set_axis_position(tags, CHANNEL_AXIS, index);
        if !tags.contains_key(CHANNEL_NAME) {
            tags.insert(CHANNEL_NAME.into(), channel.into());
        }
        if let Some(position) = metadata::position_name(tags).map(str::to_string) {
            let index = self.position_index(&position);
            metadata::set_axis_position(tags, POSITION_AXIS, index);
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.channels.iter().collect();
        names.sort_by_key(|(_, index)| **index);
        names.into_iter().map(|(name, _)| name.as_str()).collect()
    }
}

fn first_seen(map: &mut HashMap<String, i64>, name: &str) -> i64 {
    if let Some(index) = map.get(name) {
        return *index;
    }
    let index = map.len() as i64;
    map.insert(name.to_string(), index);
    index
}

/// Queues wired through the registered processors.
pub struct Pipeline {
    source: ImageSender,
    tail: ImageReceiver,
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    /// Allocate one queue per hop and attach each processor, in order, to
    /// the queue its predecessor writes to.
    pub async fn wire(mut processors: Vec<Box<dyn Processor>>, capacity: usize) -> AcqResult<Self> {
        let (source, mut upstream) = image_queue(capacity);
        for processor in processors.iter_mut() {
            let (tx, rx) = image_queue(capacity);
            processor.attach(upstream, tx).await?;
            debug!(processor = processor.name(), capacity, "processor attached");
            upstream = rx;
        }
        Ok(Self {
            source,
            tail: upstream,
            processors,
        })
    }

    /// Sender feeding the first queue.
    pub fn source(&self) -> ImageSender {
        self.source.clone()
    }

    /// Split into the source sender and the sink stage draining the tail.
    pub fn into_sink_stage(
        self,
        sink: Box<dyn DataSink>,
        acquisition: AcquisitionHandle,
        saved_hooks: Vec<Arc<dyn ImageSavedHook>>,
    ) -> (ImageSender, SinkStage) {
        let stage = SinkStage {
            tail: self.tail,
            processors: self.processors,
            sink,
            acquisition,
            saved_hooks,
            indexer: AxisIndexer::new(),
        };
        (self.source, stage)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.processors.iter().map(|p| p.name().to_string()).collect();
        f.debug_struct("Pipeline")
            .field("processors", &names)
            .finish()
    }
}

/// The loop at the end of the pipeline.
pub struct SinkStage {
    tail: ImageReceiver,
    processors: Vec<Box<dyn Processor>>,
    sink: Box<dyn DataSink>,
    acquisition: AcquisitionHandle,
    saved_hooks: Vec<Arc<dyn ImageSavedHook>>,
    indexer: AxisIndexer,
}

impl SinkStage {
    /// Drain the final queue until the sentinel; returns the number of
    /// images stored.
    ///
    /// A sink error stops the loop at once. The tail queue and the
    /// processors are dropped with the stage, which makes upstream sends
    /// fail instead of blocking forever.
    pub async fn run(mut self) -> AcqResult<u64> {
        let acq_id = self.acquisition.id();
        let mut stored = 0_u64;
        loop {
            match self.tail.recv().await {
                Some(PipelineItem::Image(mut image)) => {
                    self.indexer.stamp(&mut image.tags);
                    if let Err(e) = self.sink.put_image(&image).await {
                        error!(%acq_id, error = %e, "data sink failed; stopping pipeline");
                        return Err(into_sink_error(e));
                    }
                    stored += 1;
                    trace!(%acq_id, stored, "image stored");
                    for hook in &self.saved_hooks {
                        hook.after_save(&self.acquisition, &image);
                    }
                }
                Some(PipelineItem::Finished) => break,
                None => {
                    warn!(%acq_id, "pipeline input closed without a completion sentinel");
                    break;
                }
            }
        }

        for processor in self.processors.iter_mut() {
            if let Err(e) = processor.close().await {
                warn!(%acq_id, processor = processor.name(), error = %e, "processor close failed");
            }
        }
        self.sink.finished().await.map_err(into_sink_error)?;
        info!(
            %acq_id,
            stored,
            channels = ?self.indexer.channel_names(),
            "pipeline drained"
        );
        Ok(stored)
    }
}

pub(crate) fn into_sink_error(e: AcqError) -> AcqError {
    match e {
        AcqError::Sink(_) => e,
        other => AcqError::Sink(other.to_string()),
    }
}
