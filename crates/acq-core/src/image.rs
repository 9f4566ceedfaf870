//! Image types flowing from the hardware through the pipeline.
//!
//! Pixel payloads are `bytes::Bytes` so a processor can hand the same buffer
//! onward without copying. Ownership of a [`TaggedImage`] moves hop by hop:
//! whoever holds it is the only stage that can touch it.

use bytes::Bytes;
use serde_json::{Map, Value};

/// Per-image metadata dictionary.
pub type Tags = Map<String, Value>;

/// Frame as returned by the hardware executor, before tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub pixels: Bytes,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    /// Element of the (possibly composite) event that produced this frame
    pub sequence_index: usize,
    /// Camera name when several cameras fire on the same trigger
    pub camera: Option<String>,
}

impl RawImage {
    pub fn new(pixels: impl Into<Bytes>, width: u32, height: u32, bit_depth: u8) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            bit_depth,
            sequence_index: 0,
            camera: None,
        }
    }

    pub fn with_sequence_index(mut self, index: usize) -> Self {
        self.sequence_index = index;
        self
    }

    pub fn with_camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    /// Build a frame from 16-bit samples (little endian).
    pub fn from_u16(samples: &[u16], width: u32, height: u32, bit_depth: u8) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(bytes, width, height, bit_depth)
    }
}

/// Pixels plus the tag dictionary the pipeline attaches to them.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedImage {
    pub pixels: Bytes,
    pub tags: Tags,
}

impl TaggedImage {
    pub fn new(pixels: impl Into<Bytes>, tags: Tags) -> Self {
        Self {
            pixels: pixels.into(),
            tags,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }

    pub fn tag_str(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(Value::as_str)
    }
}

/// Element type of every pipeline queue.
///
/// `Finished` is the completion sentinel: it carries neither pixels nor tags
/// and tells each stage that no further images will arrive.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineItem {
    Image(TaggedImage),
    Finished,
}

impl PipelineItem {
    pub fn is_finished(&self) -> bool {
        matches!(self, PipelineItem::Finished)
    }

    pub fn into_image(self) -> Option<TaggedImage> {
        match self {
            PipelineItem::Image(image) => Some(image),
            PipelineItem::Finished => None,
        }
    }
}

impl From<TaggedImage> for PipelineItem {
    fn from(image: TaggedImage) -> Self {
        PipelineItem::Image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_frames_are_little_endian() {
        let raw = RawImage::from_u16(&[0x0102, 0xA0B0], 2, 1, 16);
        assert_eq!(raw.pixels.as_ref(), &[0x02, 0x01, 0xB0, 0xA0]);
        assert_eq!(raw.sequence_index, 0);
    }

    #[test]
    fn sentinel_has_no_image() {
        assert!(PipelineItem::Finished.is_finished());
        assert_eq!(PipelineItem::Finished.into_image(), None);
        let item: PipelineItem = TaggedImage::new(vec![1u8], Tags::new()).into();
        assert!(!item.is_finished());
    }
}
