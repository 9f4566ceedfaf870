//! End-to-end acquisitions against the mock microscope.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use acq_core::metadata::{
    axis_position, ELAPSED_TIME_MS, SUMMARY_ACQUISITION_ID, SUMMARY_CHANNEL_NAMES, SUMMARY_NAME,
};
use acq_core::{
    AcqError, AcqResult, AcquisitionEvent, ChannelGroup, ChannelSpec, TaggedImage, Tags,
    CHANNEL_AXIS, TIME_AXIS, Z_AXIS,
};
use acq_engine::{
    Acquisition, AcquisitionHandle, AcquisitionSettings, DataSink, EngineSettings, FnHook,
    HookStage, ImageReceiver, ImageSender, LifecycleState, Processor, TimelapseSettings,
    TransformProcessor, ZStackSettings,
};
use acq_mock::{MemorySink, MockMicroscope, MockMicroscopeConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

fn small_scope() -> MockMicroscope {
    MockMicroscope::new(MockMicroscopeConfig {
        width: 8,
        height: 8,
        ..Default::default()
    })
}

fn two_channel_stack() -> AcquisitionSettings {
    AcquisitionSettings {
        z_stack: Some(ZStackSettings {
            start_um: 0.0,
            end_um: 2.0,
            step_um: 1.0,
        }),
        channels: Some(ChannelGroup::from_channels(
            "Channel",
            vec![ChannelSpec::new("DAPI", 10.0), ChannelSpec::new("GFP", 20.0)],
        )),
        ..Default::default()
    }
}

fn events(n: usize) -> Vec<AcquisitionEvent> {
    (0..n)
        .map(|i| AcquisitionEvent::new().with_z(i as f64).with_exposure(5.0))
        .collect()
}

type Log = Arc<Mutex<Vec<String>>>;

/// Forwards everything and records when it is closed.
struct RecordingProcessor {
    name: String,
    log: Log,
    task: Option<JoinHandle<()>>,
}

impl RecordingProcessor {
    fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            task: None,
        }
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&mut self, mut input: ImageReceiver, output: ImageSender) -> AcqResult<()> {
        self.task = Some(tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                let last = item.is_finished();
                if output.send(item).await.is_err() || last {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn close(&mut self) -> AcqResult<()> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.log.lock().push(format!("close {}", self.name));
        Ok(())
    }
}

/// Sink sharing the processors' log.
struct LoggingSink {
    log: Log,
    stored: usize,
}

#[async_trait]
impl DataSink for LoggingSink {
    async fn initialize(&mut self, _acquisition: &AcquisitionHandle, _summary: &Tags) -> AcqResult<()> {
        self.log.lock().push("initialize".into());
        Ok(())
    }

    async fn put_image(&mut self, _image: &TaggedImage) -> AcqResult<()> {
        self.stored += 1;
        Ok(())
    }

    async fn finished(&mut self) -> AcqResult<()> {
        self.log.lock().push(format!("finished {}", self.stored));
        Ok(())
    }

    fn anything_written(&self) -> bool {
        self.stored > 0
    }
}

#[tokio::test]
async fn planned_acquisition_stores_every_image_with_stable_channel_indices() {
    let settings = two_channel_stack();
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(
        EngineSettings {
            name: "stack".into(),
            ..Default::default()
        },
        small_scope(),
        sink,
    );
    for (key, value) in settings.summary() {
        acq.set_summary_tag(key, value).unwrap();
    }

    acq.start().await.unwrap();
    acq.submit(settings.events().unwrap()).unwrap();
    acq.close().await.unwrap();

    assert_eq!(acq.state(), LifecycleState::Complete);
    let record = record.lock();
    assert_eq!(record.images.len(), settings.expected_events().unwrap());
    assert!(record.finished);
    assert_eq!(record.calls.first(), Some(&"initialize"));
    assert_eq!(record.calls.last(), Some(&"finished"));

    let summary = record.summary.as_ref().unwrap();
    assert_eq!(summary.get(SUMMARY_NAME), Some(&json!("stack")));
    assert_eq!(
        summary.get(SUMMARY_ACQUISITION_ID),
        Some(&json!(acq.id().to_string()))
    );
    assert_eq!(summary.get(SUMMARY_CHANNEL_NAMES), Some(&json!(["DAPI", "GFP"])));

    for image in &record.images {
        let expected = match image.tag_str("ChannelName") {
            Some("DAPI") => 0,
            Some("GFP") => 1,
            other => panic!("unexpected channel {other:?}"),
        };
        assert_eq!(axis_position(&image.tags, CHANNEL_AXIS), Some(expected));
    }
    let slices: Vec<_> = record
        .images
        .iter()
        .map(|image| axis_position(&image.tags, Z_AXIS).unwrap())
        .collect();
    assert_eq!(slices, vec![0, 0, 1, 1, 2, 2]);
}

#[tokio::test]
async fn processors_close_in_order_before_the_sink_finishes() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let acq = Acquisition::new(
        EngineSettings::default(),
        small_scope(),
        LoggingSink {
            log: Arc::clone(&log),
            stored: 0,
        },
    );
    acq.add_processor(RecordingProcessor::new("first", &log)).unwrap();
    acq.add_processor(RecordingProcessor::new("second", &log)).unwrap();

    acq.start().await.unwrap();
    acq.submit_events(events(4)).unwrap();
    acq.close().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["initialize", "close first", "close second", "finished 4"]
    );
    assert!(acq.pipeline().is_done());
    assert!(acq.is_complete());
}

#[tokio::test]
async fn transform_processors_see_images_in_order() {
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), small_scope(), sink);
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    acq.add_processor(TransformProcessor::from_fn("number", move |mut image: TaggedImage| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        image.tags.insert("Order".into(), json!(n));
        Ok(Some(image))
    }))
    .unwrap();
    acq.add_processor(TransformProcessor::from_fn("drop odd", |image: TaggedImage| {
        let odd = image.tag("Order").and_then(|v| v.as_u64()).is_some_and(|n| n % 2 == 1);
        Ok((!odd).then_some(image))
    }))
    .unwrap();

    acq.start().await.unwrap();
    acq.submit_events(events(6)).unwrap();
    acq.close().await.unwrap();

    let orders: Vec<_> = record
        .lock()
        .images
        .iter()
        .filter_map(|image| image.tag("Order").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(orders, vec![0, 2, 4]);
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn abort_stops_an_unbounded_timelapse_and_drains() {
    let scope = MockMicroscope::new(MockMicroscopeConfig {
        width: 4,
        height: 4,
        frame_delay_ms: 2,
        ..Default::default()
    });
    let executed = scope.executed_log();
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), scope, sink);
    let settings = AcquisitionSettings {
        timelapse: Some(TimelapseSettings {
            frames: None,
            interval_ms: 0.0,
        }),
        ..Default::default()
    };
    assert_eq!(settings.expected_events(), None);

    acq.start().await.unwrap();
    acq.submit(settings.events().unwrap()).unwrap();
    sleep(Duration::from_millis(40)).await;
    acq.abort().unwrap();
    acq.close().await.unwrap();

    assert!(acq.is_complete());
    let stored = record.lock().images.len();
    assert!(stored > 0);
    assert_eq!(stored, executed.lock().len());
    assert!(record.lock().finished);

    // Aborting a finished acquisition is a no-op
    acq.abort().unwrap();
    assert!(acq.is_complete());
}

#[tokio::test]
async fn hardware_failure_surfaces_in_generation() {
    let scope = MockMicroscope::new(MockMicroscopeConfig {
        width: 4,
        height: 4,
        fail_on_event: Some(3),
        ..Default::default()
    });
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), scope, sink);

    acq.start().await.unwrap();
    acq.submit_events(events(5)).unwrap();
    let result = acq.close().await;

    assert!(matches!(result, Err(AcqError::Hardware(_))));
    assert!(matches!(acq.generation().result(), Some(Err(AcqError::Hardware(_)))));
    assert_eq!(acq.pipeline().result(), Some(Ok(())));
    assert_eq!(record.lock().images.len(), 2);
    assert!(record.lock().finished);
    assert!(acq.is_complete());
}

#[tokio::test]
async fn failed_event_stream_aborts_the_acquisition() {
    let acq = Acquisition::new(EngineSettings::default(), small_scope(), MemorySink::new());
    acq.start().await.unwrap();
    let stream = vec![
        Ok(AcquisitionEvent::new()),
        Err(AcqError::Generation("focus map missing".into())),
        Ok(AcquisitionEvent::new()),
    ];
    acq.submit(stream).unwrap();
    assert!(matches!(acq.close().await, Err(AcqError::Generation(_))));
    assert!(acq.is_complete());
}

#[tokio::test]
async fn sink_failure_stops_the_pipeline() {
    let sink = MemorySink::new().failing_on_image(2);
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), small_scope(), sink);

    acq.start().await.unwrap();
    acq.submit_events(events(5)).unwrap();
    assert!(matches!(acq.close().await, Err(AcqError::Sink(_))));

    assert!(matches!(acq.pipeline().result(), Some(Err(AcqError::Sink(_)))));
    assert!(acq.is_complete());
    let record = record.lock();
    assert_eq!(record.images.len(), 1);
    assert!(!record.finished);
}

#[tokio::test]
async fn sink_failure_under_backpressure_is_reported_as_a_sink_error() {
    let settings = EngineSettings {
        queue_capacity: 1,
        sequencing: false,
        ..Default::default()
    };
    let sink = MemorySink::new().failing_on_image(1);
    let record = sink.record();
    let acq = Acquisition::new(settings, small_scope(), sink);

    acq.start().await.unwrap();
    acq.submit_events(events(50)).unwrap();
    let closed = acq.close().await;

    assert!(matches!(closed, Err(AcqError::Sink(ref msg)) if msg.contains("disk full")));
    assert_eq!(acq.generation().result(), Some(Ok(())));
    assert!(matches!(acq.pipeline().result(), Some(Err(AcqError::Sink(_)))));
    assert!(record.lock().images.is_empty());
}

#[tokio::test]
async fn sink_initialize_failure_fails_start() {
    let acq = Acquisition::new(
        EngineSettings::default(),
        small_scope(),
        MemorySink::new().failing_initialize(),
    );
    assert!(matches!(acq.start().await, Err(AcqError::Sink(_))));
    assert!(acq.is_complete());
    assert!(matches!(acq.generation().wait().await, Err(AcqError::Sink(_))));
    assert!(matches!(acq.close().await, Err(AcqError::Sink(_))));
}

#[tokio::test]
async fn hooks_can_delete_events_before_and_after_hardware() {
    let scope = small_scope();
    let executed = scope.executed_log();
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(
        EngineSettings {
            sequencing: false,
            ..Default::default()
        },
        scope,
        sink,
    );
    // Skip z = 1 entirely; discard the frames of z = 3 after acquiring them
    acq.add_hook(
        HookStage::BeforeHardware,
        FnHook::new(|event: AcquisitionEvent| (event.z_position_um() != Some(1.0)).then_some(event)),
    )
    .unwrap();
    acq.add_hook(
        HookStage::AfterHardware,
        FnHook::new(|event: AcquisitionEvent| (event.z_position_um() != Some(3.0)).then_some(event)),
    )
    .unwrap();
    let saved = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&saved);
    acq.add_image_saved_hook(move |handle: &AcquisitionHandle, _image: &TaggedImage| {
        assert!(handle.state().has_started());
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    acq.start().await.unwrap();
    acq.submit_events(events(4)).unwrap();
    acq.close().await.unwrap();

    let zs: Vec<_> = executed.lock().iter().filter_map(|e| e.z_position_um()).collect();
    assert_eq!(zs, vec![0.0, 2.0, 3.0]);
    assert_eq!(record.lock().images.len(), 2);
    assert_eq!(saved.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pause_holds_hardware_work_until_resumed() {
    let scope = small_scope();
    let executed = scope.executed_log();
    let acq = Acquisition::new(EngineSettings::default(), scope, MemorySink::new());

    acq.start().await.unwrap();
    acq.pause().unwrap();
    assert!(acq.is_paused());
    acq.submit_events(events(3)).unwrap();
    acq.finish();
    sleep(Duration::from_millis(30)).await;
    assert!(executed.lock().is_empty());

    assert!(!acq.toggle_paused().unwrap());
    acq.close().await.unwrap();
    assert_eq!(executed.lock().len(), 3);
}

#[tokio::test]
async fn abort_while_paused_executes_nothing() {
    let scope = small_scope();
    let executed = scope.executed_log();
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), scope, sink);

    acq.start().await.unwrap();
    acq.pause().unwrap();
    acq.submit_events(events(3)).unwrap();
    sleep(Duration::from_millis(10)).await;
    acq.abort().unwrap();
    acq.close().await.unwrap();

    assert!(executed.lock().is_empty());
    assert!(record.lock().finished);
    assert!(matches!(acq.resume(), Err(AcqError::InvalidState { .. })));
}

#[tokio::test(start_paused = true)]
async fn time_points_are_paced_on_the_acquisition_clock() {
    let sink = MemorySink::new();
    let record = sink.record();
    let acq = Acquisition::new(EngineSettings::default(), small_scope(), sink);
    let settings = AcquisitionSettings {
        timelapse: Some(TimelapseSettings {
            frames: Some(3),
            interval_ms: 1000.0,
        }),
        ..Default::default()
    };
    let started = tokio::time::Instant::now();

    acq.start().await.unwrap();
    acq.submit(settings.events().unwrap()).unwrap();
    acq.close().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(2000));
    let record = record.lock();
    assert_eq!(record.images.len(), 3);
    for (t, image) in record.images.iter().enumerate() {
        assert_eq!(axis_position(&image.tags, TIME_AXIS), Some(t as i64));
        let elapsed = image.tag(ELAPSED_TIME_MS).and_then(|v| v.as_u64()).unwrap();
        assert!(elapsed >= t as u64 * 1000, "time point {t} fired at {elapsed} ms");
    }
}

#[tokio::test]
async fn streams_run_in_submission_order() {
    let scope = small_scope();
    let executed = scope.executed_log();
    let acq = Acquisition::new(EngineSettings::default(), scope, MemorySink::new());
    acq.start().await.unwrap();
    acq.submit_events(events(2)).unwrap();
    acq.submit_events(vec![AcquisitionEvent::new().with_z(10.0)]).unwrap();
    acq.close().await.unwrap();

    let zs: Vec<_> = executed.lock().iter().filter_map(|e| e.z_position_um()).collect();
    assert_eq!(zs, vec![0.0, 1.0, 10.0]);
}

#[tokio::test]
async fn misuse_is_reported_synchronously() {
    let acq = Acquisition::new(EngineSettings::default(), small_scope(), MemorySink::new());
    assert!(matches!(acq.abort(), Err(AcqError::NotStarted(_))));
    assert!(matches!(acq.close().await, Err(AcqError::NotStarted(_))));

    acq.start().await.unwrap();
    assert!(matches!(
        acq.add_processor(TransformProcessor::from_fn("late", |i: TaggedImage| Ok(Some(i)))),
        Err(AcqError::AlreadyStarted(_))
    ));
    assert!(matches!(
        acq.add_hook(HookStage::BeforeHardware, FnHook::new(Some)),
        Err(AcqError::AlreadyStarted(_))
    ));
    assert!(matches!(acq.start().await, Err(AcqError::AlreadyStarted(_))));

    acq.close().await.unwrap();
    // Closing again returns the same outcome
    acq.close().await.unwrap();
    assert!(matches!(
        acq.submit_events(events(1)),
        Err(AcqError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn empty_acquisition_still_finishes_the_sink() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let acq = Acquisition::new(
        EngineSettings {
            queue_capacity: 1,
            ..Default::default()
        },
        small_scope(),
        LoggingSink {
            log: Arc::clone(&log),
            stored: 0,
        },
    );
    acq.start().await.unwrap();
    acq.close().await.unwrap();
    assert_eq!(*log.lock(), vec!["initialize", "finished 0"]);
}
