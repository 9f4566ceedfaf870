//! Simulated runs and dry-run planning against the mock microscope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use acq_core::{AcquisitionEvent, TaggedImage};
use acq_engine::{Acquisition, AcquisitionHandle, Coalescer, HardwareExecutor};
use acq_mock::{MemorySink, MockMicroscope};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppResult;

/// Outcome of a simulated acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: Uuid,
    pub name: String,
    /// Hardware calls; a burst counts once
    pub executed: usize,
    /// Images that reached the sink
    pub stored: usize,
    pub aborted: bool,
}

/// Run the configured acquisition on the mock microscope.
///
/// `stop` aborts the run when it flips to `true`; the images already in the
/// pipeline are still stored.
pub async fn run(config: &AppConfig, stop: watch::Receiver<bool>) -> AppResult<RunReport> {
    let microscope = MockMicroscope::new(config.microscope.clone());
    let executed = microscope.executed_log();
    let sink = MemorySink::new();
    let record = sink.record();

    let acq = Acquisition::new(config.engine.clone(), microscope, sink);
    for (key, value) in config.acquisition.summary() {
        acq.set_summary_tag(key, value)?;
    }
    let saved = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&saved);
    let expected = config.acquisition.expected_events();
    acq.add_image_saved_hook(move |handle: &AcquisitionHandle, _image: &TaggedImage| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 0 || expected.is_some_and(|total| n as usize == total) {
            info!(acq_id = %handle.id(), stored = n, ?expected, "progress");
        }
    })?;

    acq.start().await?;
    acq.submit(config.acquisition.events()?)?;
    acq.finish();

    let stop_requested = async move {
        let mut stop = stop;
        let requested = stop.wait_for(|requested| *requested).await.is_ok();
        requested
    };
    let mut aborted = false;
    tokio::select! {
        result = acq.close() => result?,
        true = stop_requested => {
            warn!(acq_id = %acq.id(), "stop requested; aborting");
            aborted = true;
            acq.abort()?;
            acq.close().await?;
        }
    }

    let report = RunReport {
        id: acq.id(),
        name: config.engine.name.clone(),
        executed: executed.lock().len(),
        stored: record.lock().images.len(),
        aborted,
    };
    info!(
        acq_id = %report.id,
        executed = report.executed,
        stored = report.stored,
        aborted,
        "acquisition finished"
    );
    Ok(report)
}

/// The events the configured acquisition would issue, at most `limit` of
/// them, merged into bursts when `sequenced` is set.
pub fn plan(config: &AppConfig, sequenced: bool, limit: usize) -> AppResult<Vec<AcquisitionEvent>> {
    let events = config.acquisition.events()?;
    let mut planned = Vec::new();
    if !sequenced {
        for event in events.take(limit) {
            planned.push(event?);
        }
        return Ok(planned);
    }

    let capabilities = MockMicroscope::new(config.microscope.clone()).capabilities();
    let mut coalescer = Coalescer::new(capabilities);
    for event in events {
        planned.extend(coalescer.push(event?));
        if planned.len() >= limit {
            planned.truncate(limit);
            return Ok(planned);
        }
    }
    planned.extend(coalescer.flush());
    planned.truncate(limit);
    Ok(planned)
}
