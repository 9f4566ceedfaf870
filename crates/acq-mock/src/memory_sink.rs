//! In-memory [`DataSink`] for tests and dry runs.

use std::sync::Arc;

use acq_core::{AcqError, AcqResult, TaggedImage, Tags};
use acq_engine::{AcquisitionHandle, DataSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Duration};

/// Everything a [`MemorySink`] received, in call order.
#[derive(Debug, Default)]
pub struct SinkRecord {
    pub summary: Option<Tags>,
    pub images: Vec<TaggedImage>,
    pub finished: bool,
    /// `"initialize"`, `"put_image"` and `"finished"` as they happened
    pub calls: Vec<&'static str>,
}

/// Keeps every stored image in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    record: Arc<Mutex<SinkRecord>>,
    fail_on_image: Option<usize>,
    fail_initialize: bool,
    put_delay: Duration,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the Nth `put_image` call (1-based).
    pub fn failing_on_image(mut self, n: usize) -> Self {
        self.fail_on_image = Some(n);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Slow down every `put_image` to simulate a slow disk.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    /// Shared view of what the sink received.
    pub fn record(&self) -> Arc<Mutex<SinkRecord>> {
        Arc::clone(&self.record)
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn initialize(&mut self, acquisition: &AcquisitionHandle, summary: &Tags) -> AcqResult<()> {
        let mut record = self.record.lock();
        record.calls.push("initialize");
        if self.fail_initialize {
            return Err(AcqError::Sink(format!(
                "cannot open storage for {}",
                acquisition.name()
            )));
        }
        record.summary = Some(summary.clone());
        Ok(())
    }

    async fn put_image(&mut self, image: &TaggedImage) -> AcqResult<()> {
        if !self.put_delay.is_zero() {
            sleep(self.put_delay).await;
        }
        let mut record = self.record.lock();
        record.calls.push("put_image");
        let n = record.calls.iter().filter(|c| **c == "put_image").count();
        if self.fail_on_image == Some(n) {
            return Err(AcqError::Sink(format!("disk full at image {n}")));
        }
        record.images.push(image.clone());
        Ok(())
    }

    async fn finished(&mut self) -> AcqResult<()> {
        let mut record = self.record.lock();
        record.calls.push("finished");
        record.finished = true;
        Ok(())
    }

    fn anything_written(&self) -> bool {
        !self.record.lock().images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_failure_is_reported_once() {
        let mut sink = MemorySink::new().failing_on_image(2);
        let record = sink.record();
        let image = TaggedImage::new(vec![0u8; 2], Tags::new());
        assert!(sink.put_image(&image).await.is_ok());
        assert!(matches!(sink.put_image(&image).await, Err(AcqError::Sink(_))));
        assert!(sink.put_image(&image).await.is_ok());
        assert_eq!(record.lock().images.len(), 2);
        assert!(sink.anything_written());
    }
}
