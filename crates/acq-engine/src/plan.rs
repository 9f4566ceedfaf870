//! Declarative multi-dimensional acquisition settings.
//!
//! [`AcquisitionSettings`] describes a time-lapse / z-stack / channel /
//! position acquisition and the nesting order of its axes. It expands into
//! the lazy event tree handed to [`Acquisition::submit`].
//!
//! [`Acquisition::submit`]: crate::acquisition::Acquisition::submit

use acq_core::metadata::{SUMMARY_AXIS_ORDER, SUMMARY_CHANNEL_GROUP, SUMMARY_CHANNEL_NAMES};
use acq_core::{
    AcqError, AcqResult, AcquisitionEvent, ChannelGroup, Tags, XyPosition, CHANNEL_AXIS,
    POSITION_AXIS, TIME_AXIS, Z_AXIS,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event_tree::{AxisGenerator, EventTreeIterator};
use crate::modules;

/// Nesting order of the standard axes, outermost first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcqOrder {
    PosTimeChannelSlice,
    PosTimeSliceChannel,
    TimePosChannelSlice,
    #[default]
    TimePosSliceChannel,
}

impl AcqOrder {
    pub fn time_first(self) -> bool {
        matches!(
            self,
            AcqOrder::TimePosChannelSlice | AcqOrder::TimePosSliceChannel
        )
    }

    pub fn slices_first(self) -> bool {
        matches!(
            self,
            AcqOrder::PosTimeSliceChannel | AcqOrder::TimePosSliceChannel
        )
    }

    /// Axis keys from outermost to innermost.
    pub fn axes(self) -> [&'static str; 4] {
        let (outer, inner) = if self.time_first() {
            (TIME_AXIS, POSITION_AXIS)
        } else {
            (POSITION_AXIS, TIME_AXIS)
        };
        if self.slices_first() {
            [outer, inner, Z_AXIS, CHANNEL_AXIS]
        } else {
            [outer, inner, CHANNEL_AXIS, Z_AXIS]
        }
    }
}

impl std::fmt::Display for AcqOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.axes().join(" > "))
    }
}

/// Time-lapse axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelapseSettings {
    /// Number of time points; `None` runs until aborted
    #[serde(default)]
    pub frames: Option<usize>,
    #[serde(default)]
    pub interval_ms: f64,
}

/// Z-stack axis: slices from `start_um` to `end_um` inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZStackSettings {
    pub start_um: f64,
    pub end_um: f64,
    pub step_um: f64,
}

impl ZStackSettings {
    /// Number of slices, or `None` if the range cannot be stepped through.
    pub fn slice_count(&self) -> Option<usize> {
        let span = ((self.end_um - self.start_um) / self.step_um).round();
        if !span.is_finite() || span < 0.0 || span >= i64::MAX as f64 {
            return None;
        }
        (span as usize).checked_add(1)
    }

    /// Number of slices; zero for a range [`slice_count`](Self::slice_count)
    /// rejects.
    pub fn slices(&self) -> usize {
        self.slice_count().unwrap_or(0)
    }
}

/// What to acquire and in which order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    #[serde(default)]
    pub timelapse: Option<TimelapseSettings>,
    #[serde(default)]
    pub z_stack: Option<ZStackSettings>,
    #[serde(default)]
    pub channels: Option<ChannelGroup>,
    #[serde(default)]
    pub positions: Vec<XyPosition>,
    #[serde(default)]
    pub order: AcqOrder,
    /// Exposure for events without a channel-specific one
    #[serde(default)]
    pub default_exposure_ms: Option<f64>,
}

impl AcquisitionSettings {
    pub fn validate(&self) -> AcqResult<()> {
        if let Some(timelapse) = &self.timelapse {
            if !timelapse.interval_ms.is_finite() || timelapse.interval_ms < 0.0 {
                return Err(AcqError::Config(format!(
                    "timelapse interval must be non-negative, got {}",
                    timelapse.interval_ms
                )));
            }
        }
        if let Some(z) = &self.z_stack {
            if !z.start_um.is_finite() || !z.end_um.is_finite() {
                return Err(AcqError::Config(format!(
                    "z stack bounds must be finite, got {} to {}",
                    z.start_um, z.end_um
                )));
            }
            if !z.step_um.is_finite() || z.step_um <= 0.0 {
                return Err(AcqError::Config(format!(
                    "z step must be positive, got {}",
                    z.step_um
                )));
            }
            if z.end_um < z.start_um {
                return Err(AcqError::Config(format!(
                    "z stack end {} is below its start {}",
                    z.end_um, z.start_um
                )));
            }
            if z.slice_count().is_none() {
                return Err(AcqError::Config(format!(
                    "z stack from {} to {} in steps of {} has too many slices",
                    z.start_um, z.end_um, z.step_um
                )));
            }
        }
        if let Some(exposure) = self.default_exposure_ms {
            if !exposure.is_finite() || exposure <= 0.0 {
                return Err(AcqError::Config(format!(
                    "default exposure must be positive, got {exposure}"
                )));
            }
        }
        Ok(())
    }

    fn channel_group(&self) -> Option<&ChannelGroup> {
        self.channels.as_ref().filter(|group| group.enabled().next().is_some())
    }

    /// Keys of the axes this acquisition actually uses, outermost first.
    pub fn axis_order(&self) -> Vec<&'static str> {
        self.order
            .axes()
            .into_iter()
            .filter(|axis| match *axis {
                TIME_AXIS => self.timelapse.is_some(),
                POSITION_AXIS => !self.positions.is_empty(),
                CHANNEL_AXIS => self.channel_group().is_some(),
                Z_AXIS => self.z_stack.is_some(),
                _ => false,
            })
            .collect()
    }

    /// Generators in nesting order.
    pub fn generators(&self) -> Vec<AxisGenerator> {
        self.axis_order()
            .into_iter()
            .filter_map(|axis| match axis {
                TIME_AXIS => self
                    .timelapse
                    .as_ref()
                    .map(|t| modules::timelapse(t.frames, t.interval_ms)),
                POSITION_AXIS => Some(modules::positions(&self.positions)),
                CHANNEL_AXIS => self.channel_group().map(modules::channels),
                Z_AXIS => self.z_stack.as_ref().map(|z| {
                    modules::z_stack(0, z.slices() as i64 - 1, z.step_um, z.start_um)
                }),
                _ => None,
            })
            .collect()
    }

    /// The lazy event stream for this acquisition.
    pub fn events(&self) -> AcqResult<EventTreeIterator> {
        self.validate()?;
        let mut root = AcquisitionEvent::new();
        if let Some(exposure) = self.default_exposure_ms {
            root = root.with_exposure(exposure);
        }
        let iter = EventTreeIterator::new(root, self.generators());

        // Slices nested inside channels are generated after the channel is
        // chosen, so the channel offset has to be applied to the leaves.
        match self.channel_group() {
            Some(group) if self.z_stack.is_some() && !self.order.slices_first() => {
                let group = group.clone();
                Ok(iter.with_monitor(move |event: AcquisitionEvent| {
                    let offset = event
                        .channel_name()
                        .and_then(|name| group.get(name))
                        .map_or(0.0, |spec| spec.offset_um);
                    match event.z_position_um() {
                        Some(z) if offset != 0.0 => event.with_z(z + offset),
                        _ => event,
                    }
                }))
            }
            _ => Ok(iter),
        }
    }

    /// Number of images the plan produces with one camera; `None` if
    /// unbounded or too large to count.
    pub fn expected_events(&self) -> Option<usize> {
        let frames = match &self.timelapse {
            Some(t) => t.frames?,
            None => 1,
        };
        let positions = self.positions.len().max(1);
        let channels = self.channel_group().map_or(1, |g| g.enabled().count());
        let slices = match &self.z_stack {
            Some(z) => z.slice_count()?,
            None => 1,
        };
        frames
            .checked_mul(positions)?
            .checked_mul(channels)?
            .checked_mul(slices)
    }

    /// Summary entries describing this plan.
    pub fn summary(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(SUMMARY_AXIS_ORDER.into(), json!(self.axis_order()));
        if let Some(group) = self.channel_group() {
            tags.insert(SUMMARY_CHANNEL_GROUP.into(), json!(group.name));
            let names: Vec<_> = group.enabled().map(|c| c.name.clone()).collect();
            tags.insert(SUMMARY_CHANNEL_NAMES.into(), json!(names));
        }
        tags
    }
}
