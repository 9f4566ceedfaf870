//! Image and summary tag stamping.
//!
//! The tag schema proper belongs to the storage layer; this module only
//! defines the keys the engine itself reads back (axes, channel and position
//! names) and a default [`MetadataBuilder`] that records what the event asked
//! the hardware to do.

use serde_json::{json, Value};

use crate::event::AcquisitionEvent;
use crate::image::{RawImage, Tags};

pub const AXES: &str = "Axes";
pub const CHANNEL_NAME: &str = "ChannelName";
pub const CAMERA: &str = "Camera";
pub const POSITION_NAME: &str = "PositionName";
pub const X_INTENDED: &str = "XPositionUm_Intended";
pub const Y_INTENDED: &str = "YPositionUm_Intended";
pub const Z_INTENDED: &str = "ZPositionUm_Intended";
pub const GRID_ROW: &str = "GridRow";
pub const GRID_COL: &str = "GridCol";
pub const EXPOSURE: &str = "Exposure";
pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
pub const IMAGE_TIME: &str = "Time";
pub const WIDTH: &str = "Width";
pub const HEIGHT: &str = "Height";
pub const BIT_DEPTH: &str = "BitDepth";

pub const SUMMARY_ACQUISITION_ID: &str = "AcquisitionId";
pub const SUMMARY_NAME: &str = "Name";
pub const SUMMARY_CHANNEL_GROUP: &str = "ChannelGroup";
pub const SUMMARY_CHANNEL_NAMES: &str = "ChannelNames";
pub const SUMMARY_AXIS_ORDER: &str = "AxisOrder";
pub const SUMMARY_START_TIME: &str = "StartTime";

/// Stamps each raw frame with the tags downstream stages rely on.
pub trait MetadataBuilder: Send + Sync {
    /// Tags for `raw`, produced by `event` (the single element that fired,
    /// never a composite) `elapsed_ms` after the acquisition started.
    fn image_tags(&self, raw: &RawImage, event: &AcquisitionEvent, elapsed_ms: u64) -> Tags;
}

/// Default tag layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMetadata;

impl MetadataBuilder for StandardMetadata {
    fn image_tags(&self, raw: &RawImage, event: &AcquisitionEvent, elapsed_ms: u64) -> Tags {
        let mut tags = Tags::new();
        tags.insert(WIDTH.into(), json!(raw.width));
        tags.insert(HEIGHT.into(), json!(raw.height));
        tags.insert(BIT_DEPTH.into(), json!(raw.bit_depth));
        tags.insert(ELAPSED_TIME_MS.into(), json!(elapsed_ms));
        tags.insert(
            IMAGE_TIME.into(),
            json!(chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %z").to_string()),
        );

        let mut axes = Tags::new();
        for (axis, index) in event.axes() {
            axes.insert(axis.to_string(), json!(index));
        }
        tags.insert(AXES.into(), Value::Object(axes));

        // Multi-camera frames get their own channel so they land on separate
        // channel axis indices.
        let channel = match (event.channel_name(), raw.camera.as_deref()) {
            (Some(name), Some(camera)) => Some(format!("{name}_{camera}")),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(camera)) => Some(camera.to_string()),
            (None, None) => None,
        };
        tags.insert(CHANNEL_NAME.into(), json!(channel.unwrap_or_default()));
        if let Some(camera) = &raw.camera {
            tags.insert(CAMERA.into(), json!(camera));
        }

        if let Some(xy) = event.xy_position() {
            tags.insert(X_INTENDED.into(), json!(xy.x_um));
            tags.insert(Y_INTENDED.into(), json!(xy.y_um));
            if let (Some(row), Some(col)) = (xy.grid_row, xy.grid_col) {
                tags.insert(GRID_ROW.into(), json!(row));
                tags.insert(GRID_COL.into(), json!(col));
            }
            if let Some(name) = &xy.name {
                tags.insert(POSITION_NAME.into(), json!(name));
            }
        }
        if let Some(z) = event.z_position_um() {
            tags.insert(Z_INTENDED.into(), json!(z));
        }
        if let Some(exposure) = event.exposure_ms() {
            tags.insert(EXPOSURE.into(), json!(exposure));
        }
        tags
    }
}

/// Write one axis index into the `Axes` tag, creating it if needed.
pub fn set_axis_position(tags: &mut Tags, axis: &str, index: i64) {
    let axes = tags
        .entry(AXES.to_string())
        .or_insert_with(|| Value::Object(Tags::new()));
    if !axes.is_object() {
        *axes = Value::Object(Tags::new());
    }
    if let Value::Object(map) = axes {
        map.insert(axis.to_string(), json!(index));
    }
}

pub fn axis_position(tags: &Tags, axis: &str) -> Option<i64> {
    tags.get(AXES)?.get(axis)?.as_i64()
}

/// Channel name tag, if present and non-empty.
pub fn channel_name(tags: &Tags) -> Option<&str> {
    tags.get(CHANNEL_NAME)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

pub fn position_name(tags: &Tags) -> Option<&str> {
    tags.get(POSITION_NAME).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AxisName, XyPosition};

    #[test]
    fn stamps_axes_targets_and_geometry() {
        let event = AcquisitionEvent::new()
            .with_axis(&AxisName::time(), 2)
            .with_axis(&AxisName::z(), 5)
            .with_channel(Some("Channel"), "DAPI")
            .with_z(12.5)
            .with_xy(XyPosition::new(100.0, -50.0).named("Pos0").with_grid(1, 2))
            .with_exposure(30.0);
        let raw = RawImage::new(vec![0u8; 8], 2, 2, 16);
        let tags = StandardMetadata.image_tags(&raw, &event, 1500);

        assert_eq!(axis_position(&tags, "time"), Some(2));
        assert_eq!(axis_position(&tags, "z"), Some(5));
        assert_eq!(channel_name(&tags), Some("DAPI"));
        assert_eq!(position_name(&tags), Some("Pos0"));
        assert_eq!(tags[Z_INTENDED], json!(12.5));
        assert_eq!(tags[GRID_COL], json!(2));
        assert_eq!(tags[EXPOSURE], json!(30.0));
        assert_eq!(tags[ELAPSED_TIME_MS], json!(1500));
        assert_eq!(tags[WIDTH], json!(2));
    }

    #[test]
    fn camera_name_extends_channel() {
        let event = AcquisitionEvent::new().with_channel(None, "GFP");
        let raw = RawImage::new(vec![0u8; 2], 1, 1, 16).with_camera("Left");
        let tags = StandardMetadata.image_tags(&raw, &event, 0);
        assert_eq!(channel_name(&tags), Some("GFP_Left"));
    }

    #[test]
    fn set_axis_position_creates_axes() {
        let mut tags = Tags::new();
        set_axis_position(&mut tags, "channel", 1);
        assert_eq!(axis_position(&tags, "channel"), Some(1));
        assert_eq!(channel_name(&tags), None);
    }
}
