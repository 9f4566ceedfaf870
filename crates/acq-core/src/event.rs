//! Acquisition events - the atomic unit of work handed to the hardware.
//!
//! An [`AcquisitionEvent`] says *what* to acquire next: axis indices for the
//! image coordinates plus optional hardware targets (channel, z, xy,
//! exposure, arbitrary device properties). Events are produced lazily by the
//! event tree, optionally merged into a composite burst by the sequencer, and
//! consumed exactly once by the hardware executor.
//!
//! Sentinels are not flags on the event; they are separate variants of
//! [`EngineEvent`] so that a `Finished` marker can never be mistaken for a
//! payload.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AcqError, AcqResult};

/// Axis key for the time-lapse index.
pub const TIME_AXIS: &str = "time";
/// Axis key for the z-slice index.
pub const Z_AXIS: &str = "z";
/// Axis key inferred by the pipeline from the channel name. Reserved.
pub const CHANNEL_AXIS: &str = "channel";
/// Axis key inferred by the pipeline from the stage position name. Reserved.
pub const POSITION_AXIS: &str = "position";

const RESERVED_AXES: [&str; 2] = [CHANNEL_AXIS, POSITION_AXIS];

/// A validated axis name.
///
/// The `channel` and `position` indices are inferred when images reach the
/// sink, so generators may not set them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AxisName(String);

impl AxisName {
    /// Validate an axis name.
    pub fn new(name: impl Into<String>) -> AcqResult<Self> {
        let name = name.into();
        if RESERVED_AXES.contains(&name.as_str()) {
            return Err(AcqError::ReservedAxis(name));
        }
        if name.is_empty() {
            return Err(AcqError::Generation("axis name must not be empty".into()));
        }
        Ok(Self(name))
    }

    /// The time-lapse axis.
    pub fn time() -> Self {
        Self(TIME_AXIS.to_string())
    }

    /// The z-stack axis.
    pub fn z() -> Self {
        Self(Z_AXIS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AxisName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// XY stage target, optionally tagged with its grid location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyPosition {
    /// Position label; used to infer the `position` axis index
    #[serde(default)]
    pub name: Option<String>,
    pub x_um: f64,
    pub y_um: f64,
    #[serde(default)]
    pub grid_row: Option<i64>,
    #[serde(default)]
    pub grid_col: Option<i64>,
    /// XY stage device; `None` means the default stage
    #[serde(default)]
    pub stage: Option<String>,
}

impl XyPosition {
    pub fn new(x_um: f64, y_um: f64) -> Self {
        Self {
            name: None,
            x_um,
            y_um,
            grid_row: None,
            grid_col: None,
            stage: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_grid(mut self, row: i64, col: i64) -> Self {
        self.grid_row = Some(row);
        self.grid_col = Some(col);
        self
    }

    fn key(&self) -> (u64, u64) {
        (self.x_um.to_bits(), self.y_um.to_bits())
    }
}

/// Channel selection carried by an event: a preset within a config group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSetting {
    #[serde(default)]
    pub group: Option<String>,
    pub name: String,
}

/// A `(device, property, value)` triplet applied before acquiring.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceProperty {
    pub device: String,
    pub property: String,
    pub value: String,
}

/// Which device classes vary across a composite event's sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequencedAxes {
    pub xy: bool,
    pub z: bool,
    pub exposure: bool,
    pub channel: bool,
}

impl SequencedAxes {
    /// Compute the flags for a run of events.
    ///
    /// A class is sequenced when the run holds more than one distinct value
    /// for it. An absent value counts as a distinct value of its own.
    pub fn of(run: &[AcquisitionEvent]) -> Self {
        let mut xy = HashSet::new();
        let mut z = HashSet::new();
        let mut exposure = HashSet::new();
        let mut channel = HashSet::new();
        for event in run {
            xy.insert(event.xy_position.as_ref().map(XyPosition::key));
            z.insert(event.z_position_um.map(f64::to_bits));
            exposure.insert(event.exposure_ms.map(f64::to_bits));
            channel.insert(event.channel.clone());
        }
        Self {
            xy: xy.len() > 1,
            z: z.len() > 1,
            exposure: exposure.len() > 1,
            channel: channel.len() > 1,
        }
    }

    /// Classes whose values differ between two events.
    pub fn between(a: &AcquisitionEvent, b: &AcquisitionEvent) -> Self {
        Self {
            xy: a.xy_position.as_ref().map(XyPosition::key)
                != b.xy_position.as_ref().map(XyPosition::key),
            z: a.z_position_um.map(f64::to_bits) != b.z_position_um.map(f64::to_bits),
            exposure: a.exposure_ms.map(f64::to_bits) != b.exposure_ms.map(f64::to_bits),
            channel: a.channel != b.channel,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            xy: self.xy || other.xy,
            z: self.z || other.z,
            exposure: self.exposure || other.exposure,
            channel: self.channel || other.channel,
        }
    }

    pub fn any(&self) -> bool {
        self.xy || self.z || self.exposure || self.channel
    }
}

/// The atomic unit of acquisition work.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionEvent {
    /// Insertion ordered, keys unique
    axis_positions: Vec<(AxisName, i64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<ChannelSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    z_position_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xy_position: Option<XyPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exposure_ms: Option<f64>,
    /// Sorted and deduplicated by `(device, property)`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    properties: Vec<DeviceProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum_start_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<Vec<AcquisitionEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequenced: Option<SequencedAxes>,
}

impl AcquisitionEvent {
    /// An empty root event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a composite event for a hardware-triggered burst.
    ///
    /// # Panics
    /// Panics if `run` is empty or contains a composite event.
    pub fn composite(run: Vec<AcquisitionEvent>) -> Self {
        assert!(!run.is_empty(), "composite event requires a non-empty run");
        assert!(
            run.iter().all(|e| !e.is_composite()),
            "composite events cannot be nested"
        );
        let sequenced = SequencedAxes::of(&run);
        Self {
            sequence: Some(run),
            sequenced: Some(sequenced),
            ..Self::default()
        }
    }

    // ---------------------------------------------------------------------
    // Axes
    // ---------------------------------------------------------------------

    /// Set an axis index, replacing any previous value for the axis.
    pub fn set_axis(&mut self, axis: &AxisName, index: i64) {
        match self.axis_positions.iter_mut().find(|(name, _)| name == axis) {
            Some(slot) => slot.1 = index,
            None => self.axis_positions.push((axis.clone(), index)),
        }
    }

    pub fn with_axis(mut self, axis: &AxisName, index: i64) -> Self {
        self.set_axis(axis, index);
        self
    }

    /// Set an axis by raw name, rejecting reserved axes.
    pub fn try_with_axis(self, axis: &str, index: i64) -> AcqResult<Self> {
        let axis = AxisName::new(axis)?;
        Ok(self.with_axis(&axis, index))
    }

    pub fn axis_position(&self, axis: &str) -> Option<i64> {
        self.axis_positions
            .iter()
            .find(|(name, _)| name.as_str() == axis)
            .map(|(_, index)| *index)
    }

    /// Axis indices in insertion order.
    pub fn axes(&self) -> impl Iterator<Item = (&str, i64)> {
        self.axis_positions
            .iter()
            .map(|(name, index)| (name.as_str(), *index))
    }

    // ---------------------------------------------------------------------
    // Hardware targets
    // ---------------------------------------------------------------------

    pub fn with_channel(mut self, group: Option<&str>, name: impl Into<String>) -> Self {
        self.channel = Some(ChannelSetting {
            group: group.map(str::to_string),
            name: name.into(),
        });
        self
    }

    pub fn channel(&self) -> Option<&ChannelSetting> {
        self.channel.as_ref()
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.name.as_str())
    }

    pub fn with_z(mut self, z_um: f64) -> Self {
        self.z_position_um = Some(z_um);
        self
    }

    pub fn z_position_um(&self) -> Option<f64> {
        self.z_position_um
    }

    pub fn with_xy(mut self, position: XyPosition) -> Self {
        self.xy_position = Some(position);
        self
    }

    pub fn xy_position(&self) -> Option<&XyPosition> {
        self.xy_position.as_ref()
    }

    pub fn with_exposure(mut self, exposure_ms: f64) -> Self {
        self.exposure_ms = Some(exposure_ms);
        self
    }

    pub fn set_exposure(&mut self, exposure_ms: f64) {
        self.exposure_ms = Some(exposure_ms);
    }

    pub fn exposure_ms(&self) -> Option<f64> {
        self.exposure_ms
    }

    /// Add a device property; a later value for the same `(device, property)`
    /// replaces the earlier one.
    pub fn set_property(
        &mut self,
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) {
        let prop = DeviceProperty {
            device: device.into(),
            property: property.into(),
            value: value.into(),
        };
        let slot = self.properties.binary_search_by(|p| {
            (p.device.as_str(), p.property.as_str())
                .cmp(&(prop.device.as_str(), prop.property.as_str()))
        });
        match slot {
            Ok(idx) => self.properties[idx] = prop,
            Err(idx) => self.properties.insert(idx, prop),
        }
    }

    pub fn with_property(
        mut self,
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set_property(device, property, value);
        self
    }

    pub fn properties(&self) -> &[DeviceProperty] {
        &self.properties
    }

    pub fn with_minimum_start_time_ms(mut self, ms: u64) -> Self {
        self.minimum_start_time_ms = Some(ms);
        self
    }

    pub fn minimum_start_time_ms(&self) -> Option<u64> {
        self.minimum_start_time_ms
    }

    // ---------------------------------------------------------------------
    // Composite events
    // ---------------------------------------------------------------------

    pub fn is_composite(&self) -> bool {
        self.sequence.is_some()
    }

    /// The burst this composite event stands for.
    pub fn sequence(&self) -> Option<&[AcquisitionEvent]> {
        self.sequence.as_deref()
    }

    /// Varying device classes; all `false` for a plain event.
    pub fn sequenced(&self) -> SequencedAxes {
        self.sequenced.unwrap_or_default()
    }

    /// Number of single acquisitions this event stands for.
    pub fn num_elements(&self) -> usize {
        self.sequence.as_ref().map_or(1, Vec::len)
    }

    /// The single event at `index` of the burst; a plain event is its own
    /// element 0.
    pub fn element(&self, index: usize) -> Option<&AcquisitionEvent> {
        match &self.sequence {
            Some(run) => run.get(index),
            None if index == 0 => Some(self),
            None => None,
        }
    }

    /// Minimum start time of the burst (the first element's for composites).
    pub fn effective_minimum_start_time_ms(&self) -> Option<u64> {
        match &self.sequence {
            Some(run) => run.first().and_then(|e| e.minimum_start_time_ms),
            None => self.minimum_start_time_ms,
        }
    }
}

impl fmt::Display for AcquisitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(run) = &self.sequence {
            let flags = self.sequenced();
            write!(
                f,
                "sequence[{}] (xy={} z={} exposure={} channel={})",
                run.len(),
                flags.xy,
                flags.z,
                flags.exposure,
                flags.channel
            )?;
            return Ok(());
        }
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            Ok(())
        };
        for (axis, index) in self.axes() {
            sep(f)?;
            write!(f, "{axis}={index}")?;
        }
        if let Some(name) = self.channel_name() {
            sep(f)?;
            write!(f, "channel={name}")?;
        }
        if let Some(z) = self.z_position_um {
            sep(f)?;
            write!(f, "z_um={z}")?;
        }
        if let Some(xy) = &self.xy_position {
            sep(f)?;
            write!(f, "xy_um=({}, {})", xy.x_um, xy.y_um)?;
        }
        if let Some(exposure) = self.exposure_ms {
            sep(f)?;
            write!(f, "exposure_ms={exposure}")?;
        }
        if first {
            f.write_str("<empty>")?;
        }
        Ok(())
    }
}

/// What the generator hands to the execution step.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A plain or composite event to execute.
    Acquire(AcquisitionEvent),
    /// The current event stream ended; flush anything being coalesced.
    SequenceEnd,
    /// No more events will follow; drain the pipeline.
    Finished,
}

impl EngineEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, EngineEvent::Finished)
    }

    pub fn as_acquisition(&self) -> Option<&AcquisitionEvent> {
        match self {
            EngineEvent::Acquire(event) => Some(event),
            _ => None,
        }
    }
}
