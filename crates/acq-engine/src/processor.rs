//! Task-backed processor built from a per-image transform.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use acq_core::{AcqError, AcqResult, PipelineItem, TaggedImage};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::capabilities::Processor;
use crate::pipeline::{ImageReceiver, ImageSender};

/// Per-image work done by a [`TransformProcessor`].
pub trait ImageTransform: Send + 'static {
    /// Transform one image. `Ok(None)` drops the image.
    ///
    /// An error is logged and the image is dropped; the transform keeps
    /// receiving later images.
    fn process(&mut self, image: TaggedImage) -> AcqResult<Option<TaggedImage>>;
}

/// Transform built from a closure.
pub struct FnTransform<F>(F);

impl<F> ImageTransform for FnTransform<F>
where
    F: FnMut(TaggedImage) -> AcqResult<Option<TaggedImage>> + Send + 'static,
{
    fn process(&mut self, image: TaggedImage) -> AcqResult<Option<TaggedImage>> {
        (self.0)(image)
    }
}

/// Runs an [`ImageTransform`] on its own task.
pub struct TransformProcessor<T> {
    name: String,
    transform: Option<T>,
    task: Option<JoinHandle<()>>,
    stats: Arc<TransformStats>,
}

/// Counters shared with the processor task.
#[derive(Debug, Default)]
pub struct TransformStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl TransformStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl<T: ImageTransform> TransformProcessor<T> {
    pub fn new(name: impl Into<String>, transform: T) -> Self {
        Self {
            name: name.into(),
            transform: Some(transform),
            task: None,
            stats: Arc::new(TransformStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<TransformStats> {
        Arc::clone(&self.stats)
    }
}

impl<F> TransformProcessor<FnTransform<F>>
where
    F: FnMut(TaggedImage) -> AcqResult<Option<TaggedImage>> + Send + 'static,
{
    pub fn from_fn(name: impl Into<String>, f: F) -> Self {
        Self::new(name, FnTransform(f))
    }
}

async fn run_transform<T: ImageTransform>(
    name: String,
    mut transform: T,
    mut input: ImageReceiver,
    output: ImageSender,
    stats: Arc<TransformStats>,
) {
    while let Some(item) = input.recv().await {
        let image = match item {
            PipelineItem::Image(image) => image,
            PipelineItem::Finished => {
                if output.send(PipelineItem::Finished).await.is_err() {
                    warn!(processor = %name, "downstream closed before the sentinel");
                }
                debug!(processor = %name, processed = stats.processed(), "processor drained");
                return;
            }
        };
        match transform.process(image) {
            Ok(Some(out)) => {
                stats.processed.fetch_add(1, Ordering::Relaxed);
                if output.send(out.into()).await.is_err() {
                    warn!(processor = %name, "downstream closed; stopping");
                    return;
                }
            }
            Ok(None) => {
                stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                let e = match e {
                    AcqError::Processor { .. } => e,
                    other => AcqError::processor(&name, other),
                };
                error!(processor = %name, error = %e, "processor failed on image");
            }
        }
    }
    warn!(processor = %name, "input closed without a completion sentinel");
}

#[async_trait]
impl<T: ImageTransform> Processor for TransformProcessor<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&mut self, input: ImageReceiver, output: ImageSender) -> AcqResult<()> {
        let transform = self.transform.take().ok_or_else(|| AcqError::InvalidState {
            operation: "attach processor",
            state: "attached".into(),
        })?;
        let task = tokio::spawn(run_transform(
            self.name.clone(),
            transform,
            input,
            output,
            Arc::clone(&self.stats),
        ));
        self.task = Some(task);
        Ok(())
    }

    async fn close(&mut self) -> AcqResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| AcqError::processor(&self.name, format!("task failed: {e}")))
    }
}

impl<T> Drop for TransformProcessor<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
