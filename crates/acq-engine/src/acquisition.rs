//! Acquisition controller: registration, start, pause, abort and shutdown.
//!
//! An [`Acquisition`] owns one generator task and one sink task once
//! started:
//!
//! - the **generator task** pulls events from the submitted streams,
//!   coalesces them into hardware sequences, runs the hooks, executes each
//!   event on the hardware and pushes the tagged frames into the pipeline;
//! - the **sink task** drains the last pipeline queue into the data sink.
//!
//! Completion is reported in two stages through [`Completion`]s:
//! `generation` resolves once no more hardware requests will be issued,
//! `pipeline` once the sink has processed the completion sentinel. Errors
//! surface through them; [`Acquisition::close`] awaits both in order.
//!
//! # Usage
//!
//! ```rust,ignore
//! let acq = Acquisition::new(EngineSettings::default(), microscope, sink);
//! acq.add_processor(TransformProcessor::from_fn("flip", flip))?;
//! acq.start().await?;
//! acq.submit(settings.events()?)?;
//! acq.close().await?;
//! ```

use std::sync::Arc;

use acq_core::metadata::{SUMMARY_ACQUISITION_ID, SUMMARY_NAME, SUMMARY_START_TIME};
use acq_core::{
    AcqError, AcqResult, AcquisitionEvent, EngineEvent, MetadataBuilder, PipelineItem,
    StandardMetadata, TaggedImage, Tags,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::capabilities::{DataSink, HardwareExecutor, Processor};
use crate::hooks::{AcquisitionHook, HookStage, ImageSavedHook};
use crate::lifecycle::{
    completion, AcquisitionHandle, Completion, CompletionSetter, Lifecycle, LifecycleState,
};
use crate::pipeline::{into_sink_error, ImageSender, Pipeline, DEFAULT_QUEUE_CAPACITY};
use crate::sequencer::Coalescer;

/// A stream of events submitted to a running acquisition.
pub type EventSource = Box<dyn Iterator<Item = AcqResult<AcquisitionEvent>> + Send>;

/// Engine tuning shared by every acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Acquisition name reported to the sink
    #[serde(default = "default_name")]
    pub name: String,
    /// Capacity of every pipeline queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Merge consecutive events into hardware sequences when possible
    #[serde(default = "default_sequencing")]
    pub sequencing: bool,
}

fn default_name() -> String {
    "acquisition".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_sequencing() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            queue_capacity: default_queue_capacity(),
            sequencing: default_sequencing(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("acquisition name must not be empty".to_string());
        }
        Ok(())
    }
}

/// Collaborators registered before start, moved into the tasks by `start`.
struct Registration {
    hardware: Box<dyn HardwareExecutor>,
    sink: Box<dyn DataSink>,
    processors: Vec<Box<dyn Processor>>,
    before_hooks: Vec<Box<dyn AcquisitionHook>>,
    after_hooks: Vec<Box<dyn AcquisitionHook>>,
    saved_hooks: Vec<Arc<dyn ImageSavedHook>>,
    metadata: Arc<dyn MetadataBuilder>,
    summary: Tags,
    submissions: mpsc::UnboundedReceiver<EventSource>,
    generation: CompletionSetter,
    pipeline: CompletionSetter,
}

/// One multi-dimensional acquisition.
pub struct Acquisition {
    settings: EngineSettings,
    handle: AcquisitionHandle,
    lifecycle: Arc<Lifecycle>,
    registration: Mutex<Option<Registration>>,
    submit_tx: Mutex<Option<mpsc::UnboundedSender<EventSource>>>,
    generation: Completion,
    pipeline: Completion,
}

impl Acquisition {
    pub fn new(
        settings: EngineSettings,
        hardware: impl HardwareExecutor + 'static,
        sink: impl DataSink + 'static,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let handle = AcquisitionHandle::new(&settings.name, &lifecycle);
        let (submit_tx, submissions) = mpsc::unbounded_channel();
        let (generation_setter, generation) = completion();
        let (pipeline_setter, pipeline) = completion();
        let registration = Registration {
            hardware: Box::new(hardware),
            sink: Box::new(sink),
            processors: Vec::new(),
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
            saved_hooks: Vec::new(),
            metadata: Arc::new(StandardMetadata),
            summary: Tags::new(),
            submissions,
            generation: generation_setter,
            pipeline: pipeline_setter,
        };
        Self {
            settings,
            handle,
            lifecycle,
            registration: Mutex::new(Some(registration)),
            submit_tx: Mutex::new(Some(submit_tx)),
            generation,
            pipeline,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn handle(&self) -> AcquisitionHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Resolves when no more hardware requests will be issued.
    pub fn generation(&self) -> Completion {
        self.generation.clone()
    }

    /// Resolves when the sink has processed the completion sentinel.
    pub fn pipeline(&self) -> Completion {
        self.pipeline.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Complete
    }

    pub fn is_paused(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Paused
    }

    // ---------------------------------------------------------------------
    // Registration (before start only)
    // ---------------------------------------------------------------------

    fn register<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Registration) -> R,
    ) -> AcqResult<R> {
        let mut guard = self.registration.lock();
        let registration = guard
            .as_mut()
            .ok_or_else(|| AcqError::AlreadyStarted(operation.to_string()))?;
        Ok(f(registration))
    }

    /// Append a processor; processors run in registration order.
    pub fn add_processor(&self, processor: impl Processor + 'static) -> AcqResult<()> {
        self.register("add processor", |r| r.processors.push(Box::new(processor)))
    }

    pub fn add_hook(&self, stage: HookStage, hook: impl AcquisitionHook + 'static) -> AcqResult<()> {
        self.register("add hook", |r| match stage {
            HookStage::BeforeHardware => r.before_hooks.push(Box::new(hook)),
            HookStage::AfterHardware => r.after_hooks.push(Box::new(hook)),
        })
    }

    pub fn add_image_saved_hook(&self, hook: impl ImageSavedHook + 'static) -> AcqResult<()> {
        self.register("add image saved hook", |r| r.saved_hooks.push(Arc::new(hook)))
    }

    pub fn set_metadata_builder(&self, builder: Arc<dyn MetadataBuilder>) -> AcqResult<()> {
        self.register("set metadata builder", |r| r.metadata = builder)
    }

    /// Extra entry for the summary handed to the sink at start.
    pub fn set_summary_tag(&self, key: impl Into<String>, value: Value) -> AcqResult<()> {
        self.register("set summary tag", |r| {
            r.summary.insert(key.into(), value);
        })
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Wire the pipeline, initialize the sink and spawn both tasks.
    ///
    /// Registrations are snapshotted here; later ones fail with
    /// [`AcqError::AlreadyStarted`].
    #[instrument(skip(self), fields(acq_id = %self.handle.id()))]
    pub async fn start(&self) -> AcqResult<()> {
        let registration = self
            .registration
            .lock()
            .take()
            .ok_or_else(|| AcqError::AlreadyStarted("start".into()))?;
        self.lifecycle.start()?;

        let Registration {
            hardware,
            mut sink,
            processors,
            before_hooks,
            after_hooks,
            saved_hooks,
            metadata,
            mut summary,
            submissions,
            generation,
            pipeline,
        } = registration;

        summary.insert(SUMMARY_ACQUISITION_ID.into(), json!(self.handle.id().to_string()));
        summary.insert(SUMMARY_NAME.into(), json!(self.handle.name()));
        summary.insert(
            SUMMARY_START_TIME.into(),
            json!(chrono::Local::now().to_rfc3339()),
        );

        let processor_count = processors.len();
        let wired = match sink.initialize(&self.handle, &summary).await {
            Ok(()) => Pipeline::wire(processors, self.settings.queue_capacity).await,
            Err(e) => Err(into_sink_error(e)),
        };
        let wired = match wired {
            Ok(wired) => wired,
            Err(e) => {
                error!(error = %e, "acquisition failed to start");
                self.lifecycle.finishing();
                self.lifecycle.complete();
                generation.resolve(Err(e.clone()));
                pipeline.resolve(Err(e.clone()));
                return Err(e);
            }
        };

        let (source, stage) = wired.into_sink_stage(sink, self.handle.clone(), saved_hooks);

        let lifecycle = Arc::clone(&self.lifecycle);
        let generation_done = self.generation.clone();
        tokio::spawn(async move {
            let result = stage.run().await;
            if result.is_err() {
                let _ = lifecycle.abort();
                let _ = generation_done.wait().await;
            }
            lifecycle.complete();
            pipeline.resolve(result.map(|_| ()));
        });

        let coalescer = self
            .settings
            .sequencing
            .then(|| Coalescer::new(hardware.capabilities()));
        let generator = Generator {
            acq_id: self.handle.id(),
            hardware,
            before_hooks,
            after_hooks,
            metadata,
            coalescer,
            source,
            lifecycle: Arc::clone(&self.lifecycle),
            submissions,
            clock: Instant::now(),
            executed: 0,
            images: 0,
        };
        tokio::spawn(async move {
            let result = generator.run().await;
            generation.resolve(result);
        });

        info!(
            name = %self.handle.name(),
            processors = processor_count,
            queue_capacity = self.settings.queue_capacity,
            "acquisition started"
        );
        Ok(())
    }

    /// Stop issuing hardware work. Queues keep draining.
    pub fn pause(&self) -> AcqResult<()> {
        self.lifecycle.pause()?;
        info!(acq_id = %self.handle.id(), "acquisition paused");
        Ok(())
    }

    pub fn resume(&self) -> AcqResult<()> {
        self.lifecycle.resume()?;
        info!(acq_id = %self.handle.id(), "acquisition resumed");
        Ok(())
    }

    /// Flip between running and paused; returns whether now paused.
    pub fn toggle_paused(&self) -> AcqResult<bool> {
        let state = self.lifecycle.toggle_paused()?;
        let paused = state == LifecycleState::Paused;
        info!(acq_id = %self.handle.id(), paused, "acquisition pause toggled");
        Ok(paused)
    }

    /// Discard the remaining events and drain the pipeline.
    ///
    /// An in-flight hardware call is not interrupted; the sentinel follows
    /// it. Aborting after generation stopped is a no-op.
    pub fn abort(&self) -> AcqResult<()> {
        let state = self.lifecycle.abort().map_err(|_| AcqError::NotStarted("abort".into()))?;
        self.submit_tx.lock().take();
        warn!(acq_id = %self.handle.id(), %state, "acquisition abort requested");
        Ok(())
    }

    /// Queue another event stream. Streams run in submission order.
    pub fn submit<I>(&self, events: I) -> AcqResult<()>
    where
        I: IntoIterator<Item = AcqResult<AcquisitionEvent>>,
        I::IntoIter: Send + 'static,
    {
        let guard = self.submit_tx.lock();
        let tx = guard.as_ref().ok_or_else(|| AcqError::InvalidState {
            operation: "submit events",
            state: "finished".into(),
        })?;
        tx.send(Box::new(events.into_iter()))
            .map_err(|_| AcqError::InvalidState {
                operation: "submit events",
                state: self.lifecycle.state().to_string(),
            })
    }

    /// [`submit`](Self::submit) for infallible streams.
    pub fn submit_events<I>(&self, events: I) -> AcqResult<()>
    where
        I: IntoIterator<Item = AcquisitionEvent>,
        I::IntoIter: Send + 'static,
    {
        self.submit(events.into_iter().map(Ok))
    }

    /// No more streams will be submitted. Generation ends once the queued
    /// streams are exhausted.
    pub fn finish(&self) {
        if self.submit_tx.lock().take().is_some() {
            debug!(acq_id = %self.handle.id(), "no more event streams");
        }
    }

    /// Finish, then wait for generation and for the pipeline to drain.
    ///
    /// Safe to call repeatedly. Returns the generation error if there was
    /// one, otherwise the pipeline result.
    #[instrument(skip(self), fields(acq_id = %self.handle.id()))]
    pub async fn close(&self) -> AcqResult<()> {
        if !self.lifecycle.state().has_started() {
            return Err(AcqError::NotStarted("close".into()));
        }
        self.finish();
        let generation = self.generation.wait().await;
        let pipeline = self.pipeline.wait().await;
        debug!(generation_ok = generation.is_ok(), pipeline_ok = pipeline.is_ok(), "closed");
        generation.and(pipeline)
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("id", &self.handle.id())
            .field("name", &self.handle.name())
            .field("state", &self.lifecycle.state())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Resolves once the lifecycle reaches `Aborting`.
async fn wait_for_abort(state: &mut watch::Receiver<LifecycleState>) {
    let _ = state
        .wait_for(|s| *s == LifecycleState::Aborting)
        .await
        .map(|_| ());
}

/// Block while paused. Returns `false` if the acquisition is aborting.
async fn wait_while_paused(lifecycle: &Lifecycle) -> bool {
    let mut state = lifecycle.subscribe();
    let current = state
        .wait_for(|s| *s != LifecycleState::Paused)
        .await
        .map(|s| *s);
    matches!(current, Ok(LifecycleState::Running))
}

/// Sleep until `deadline`. Returns `false` if the acquisition is aborting.
async fn wait_until(lifecycle: &Lifecycle, deadline: Instant) -> bool {
    if Instant::now() < deadline {
        let mut state = lifecycle.subscribe();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = wait_for_abort(&mut state) => return false,
        }
    }
    lifecycle.state() != LifecycleState::Aborting
}

async fn run_hooks(
    hooks: &mut [Box<dyn AcquisitionHook>],
    event: AcquisitionEvent,
) -> AcqResult<Option<AcquisitionEvent>> {
    let mut current = event;
    for hook in hooks.iter_mut() {
        match hook.run(current).await? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// The single task that talks to the hardware.
struct Generator {
    acq_id: Uuid,
    hardware: Box<dyn HardwareExecutor>,
    before_hooks: Vec<Box<dyn AcquisitionHook>>,
    after_hooks: Vec<Box<dyn AcquisitionHook>>,
    metadata: Arc<dyn MetadataBuilder>,
    coalescer: Option<Coalescer>,
    source: ImageSender,
    lifecycle: Arc<Lifecycle>,
    submissions: mpsc::UnboundedReceiver<EventSource>,
    /// Acquisition clock; minimum start times are relative to it
    clock: Instant,
    executed: u64,
    images: u64,
}

impl Generator {
    async fn run(mut self) -> AcqResult<()> {
        let result = self.generate().await;
        if let Err(e) = &result {
            error!(acq_id = %self.acq_id, error = %e, "event generation failed; aborting");
            let _ = self.lifecycle.abort();
        }
        self.dispatch(EngineEvent::Finished).await?;
        info!(
            acq_id = %self.acq_id,
            executed = self.executed,
            images = self.images,
            "event generation stopped"
        );
        result
    }

    fn aborting(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Aborting
    }

    async fn next_stream(&mut self) -> Option<EventSource> {
        let mut state = self.lifecycle.subscribe();
        tokio::select! {
            biased;
            _ = wait_for_abort(&mut state) => None,
            stream = self.submissions.recv() => stream,
        }
    }

    async fn generate(&mut self) -> AcqResult<()> {
        while let Some(stream) = self.next_stream().await {
            for next in stream {
                if self.aborting() {
                    return Ok(());
                }
                self.dispatch(EngineEvent::Acquire(next?)).await?;
            }
            self.dispatch(EngineEvent::SequenceEnd).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: EngineEvent) -> AcqResult<()> {
        match event {
            EngineEvent::Acquire(event) => {
                let ready = match self.coalescer.as_mut() {
                    Some(coalescer) => coalescer.push(event),
                    None => vec![event],
                };
                for event in ready {
                    self.execute(event).await?;
                }
            }
            EngineEvent::SequenceEnd => {
                if let Some(event) = self.coalescer.as_mut().and_then(Coalescer::flush) {
                    self.execute(event).await?;
                }
            }
            EngineEvent::Finished => {
                if let Some(coalescer) = self.coalescer.as_mut() {
                    let dropped = coalescer.discard();
                    if dropped > 0 {
                        debug!(acq_id = %self.acq_id, dropped, "discarded pending events");
                    }
                }
                for hook in self.before_hooks.iter_mut().chain(self.after_hooks.iter_mut()) {
                    hook.close().await;
                }
                self.lifecycle.finishing();
                if self.source.send(PipelineItem::Finished).await.is_err() {
                    warn!(acq_id = %self.acq_id, "pipeline closed before the completion sentinel");
                }
            }
        }
        Ok(())
    }

    async fn execute(&mut self, event: AcquisitionEvent) -> AcqResult<()> {
        if let Some(at_ms) = event.effective_minimum_start_time_ms() {
            let deadline = self.clock + Duration::from_millis(at_ms);
            trace!(acq_id = %self.acq_id, at_ms, "waiting for minimum start time");
            if !wait_until(&self.lifecycle, deadline).await {
                return Ok(());
            }
        }
        if !wait_while_paused(&self.lifecycle).await {
            return Ok(());
        }

        let Some(event) = run_hooks(&mut self.before_hooks, event).await? else {
            debug!(acq_id = %self.acq_id, "event deleted before hardware");
            return Ok(());
        };
        trace!(acq_id = %self.acq_id, %event, "executing");
        let frames = self.hardware.execute(&event).await?;
        self.executed += 1;

        let Some(event) = run_hooks(&mut self.after_hooks, event).await? else {
            debug!(
                acq_id = %self.acq_id,
                discarded = frames.len(),
                "event deleted after hardware"
            );
            return Ok(());
        };

        let elapsed_ms = self.clock.elapsed().as_millis() as u64;
        for raw in frames {
            let element = match event.element(raw.sequence_index) {
                Some(element) => element,
                None => {
                    warn!(
                        acq_id = %self.acq_id,
                        sequence_index = raw.sequence_index,
                        "frame index outside the executed sequence"
                    );
                    &event
                }
            };
            let tags = self.metadata.image_tags(&raw, element, elapsed_ms);
            let image = TaggedImage::new(raw.pixels, tags);
            // The sink task reports its own failure on the pipeline
            // completion; generation just stops.
            if self.source.send(image.into()).await.is_err() {
                warn!(acq_id = %self.acq_id, "pipeline stopped accepting images; aborting");
                let _ = self.lifecycle.abort();
                return Ok(());
            }
            self.images += 1;
        }
        Ok(())
    }
}
