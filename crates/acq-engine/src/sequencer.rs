//! Hardware sequencing: merging runs of events into one triggered burst.
//!
//! When consecutive events differ only in device settings the hardware can
//! pre-load (a z-stage sequence, an exposure sequence, ...), they are replaced
//! by one composite event and executed with a single trigger, which removes
//! per-image software round trips.
//!
//! The decision is made per device class: a class is *varying* if the run
//! holds more than one distinct value for it, and a run is sequenceable only
//! if the camera can take the whole burst and the hardware accepts every
//! varying class at the run's length. What the hardware accepts is injected
//! through [`SequencingCapabilities`].

use std::sync::Arc;

use acq_core::{AcquisitionEvent, SequencedAxes, TIME_AXIS};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Device classes the engine knows how to sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// The camera taking the burst; required for every run
    Camera,
    XyStage,
    ZStage,
    Exposure,
    Channel,
}

impl DeviceClass {
    /// Classes that may vary within a run.
    pub const VARYING: [DeviceClass; 4] = [
        DeviceClass::XyStage,
        DeviceClass::ZStage,
        DeviceClass::Exposure,
        DeviceClass::Channel,
    ];

    fn varies_in(self, flags: SequencedAxes) -> bool {
        match self {
            DeviceClass::XyStage => flags.xy,
            DeviceClass::ZStage => flags.z,
            DeviceClass::Exposure => flags.exposure,
            DeviceClass::Channel => flags.channel,
            DeviceClass::Camera => false,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceClass::Camera => write!(f, "camera"),
            DeviceClass::XyStage => write!(f, "xy_stage"),
            DeviceClass::ZStage => write!(f, "z_stage"),
            DeviceClass::Exposure => write!(f, "exposure"),
            DeviceClass::Channel => write!(f, "channel"),
        }
    }
}

/// What the hardware can execute as a triggered sequence.
pub trait SequencingCapabilities: Send + Sync {
    /// Whether `class` can take `run_len` distinct values in one burst.
    fn is_sequenceable(&self, class: DeviceClass, run_len: usize) -> bool;
}

/// Hardware without any sequencing support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSequencing;

impl SequencingCapabilities for NoSequencing {
    fn is_sequenceable(&self, _class: DeviceClass, _run_len: usize) -> bool {
        false
    }
}

/// Maximum sequence length per device class; `None` = not sequenceable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedCapabilities {
    #[serde(default)]
    pub camera: Option<usize>,
    #[serde(default)]
    pub xy_stage: Option<usize>,
    #[serde(default)]
    pub z_stage: Option<usize>,
    #[serde(default)]
    pub exposure: Option<usize>,
    #[serde(default)]
    pub channel: Option<usize>,
}

impl SequencingCapabilities for FixedCapabilities {
    fn is_sequenceable(&self, class: DeviceClass, run_len: usize) -> bool {
        let max = match class {
            DeviceClass::Camera => self.camera,
            DeviceClass::XyStage => self.xy_stage,
            DeviceClass::ZStage => self.z_stage,
            DeviceClass::Exposure => self.exposure,
            DeviceClass::Channel => self.channel,
        };
        max.is_some_and(|max| run_len <= max)
    }
}

/// Whether a burst of `run_len` frames varying in `flags` is accepted.
fn accepted(flags: SequencedAxes, run_len: usize, caps: &dyn SequencingCapabilities) -> bool {
    caps.is_sequenceable(DeviceClass::Camera, run_len)
        && DeviceClass::VARYING
            .iter()
            .filter(|class| class.varies_in(flags))
            .all(|class| caps.is_sequenceable(*class, run_len))
}

/// Whether `run` could execute as one burst. Runs shorter than two events
/// gain nothing and are never sequenceable.
pub fn can_sequence(run: &[AcquisitionEvent], caps: &dyn SequencingCapabilities) -> bool {
    run.len() >= 2 && accepted(SequencedAxes::of(run), run.len(), caps)
}

/// Replace a run by the event that executes it.
///
/// A single event is returned unchanged; longer runs become a composite
/// event holding the run in its original order.
///
/// # Panics
/// Panics on an empty run.
pub fn merge(mut run: Vec<AcquisitionEvent>) -> AcquisitionEvent {
    assert!(!run.is_empty(), "sequencer received an empty run");
    if run.len() == 1 {
        if let Some(only) = run.pop() {
            return only;
        }
    }
    AcquisitionEvent::composite(run)
}

/// Incrementally groups a stream of events into sequenceable runs.
///
/// Events are held back while the pending run can still grow; a run is
/// released when the next event cannot join it, or on [`flush`](Self::flush).
pub struct Coalescer {
    caps: Arc<dyn SequencingCapabilities>,
    pending: Vec<AcquisitionEvent>,
    /// Varying classes of `pending`
    flags: SequencedAxes,
}

impl Coalescer {
    pub fn new(caps: Arc<dyn SequencingCapabilities>) -> Self {
        Self {
            caps,
            pending: Vec::new(),
            flags: SequencedAxes::default(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn extends(&self, next: &AcquisitionEvent) -> Option<SequencedAxes> {
        let (first, last) = (self.pending.first()?, self.pending.last()?);
        if next.is_composite() || last.properties() != next.properties() {
            return None;
        }
        // Different time points may only share a burst when they share a
        // start time.
        if last.axis_position(TIME_AXIS) != next.axis_position(TIME_AXIS)
            && last.minimum_start_time_ms() != next.minimum_start_time_ms()
        {
            return None;
        }
        let flags = self.flags.union(SequencedAxes::between(first, next));
        accepted(flags, self.pending.len() + 1, self.caps.as_ref()).then_some(flags)
    }

    /// Offer the next event; returns the events that are ready to execute.
    pub fn push(&mut self, event: AcquisitionEvent) -> Vec<AcquisitionEvent> {
        if self.pending.is_empty() {
            if event.is_composite() {
                return vec![event];
            }
            self.pending.push(event);
            return Vec::new();
        }
        if let Some(flags) = self.extends(&event) {
            trace!(len = self.pending.len() + 1, "extending sequence");
            self.flags = flags;
            self.pending.push(event);
            return Vec::new();
        }
        let mut ready = Vec::with_capacity(2);
        ready.extend(self.flush());
        if event.is_composite() {
            ready.push(event);
        } else {
            self.pending.push(event);
        }
        ready
    }

    /// Release the pending run, if any.
    pub fn flush(&mut self) -> Option<AcquisitionEvent> {
        self.flags = SequencedAxes::default();
        if self.pending.is_empty() {
            return None;
        }
        Some(merge(std::mem::take(&mut self.pending)))
    }

    /// Drop the pending run without executing it; returns how many events
    /// were dropped.
    pub fn discard(&mut self) -> usize {
        self.flags = SequencedAxes::default();
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

impl std::fmt::Debug for Coalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("pending", &self.pending.len())
            .field("flags", &self.flags)
            .finish()
    }
}
