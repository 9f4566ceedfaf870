//! Mock microscope implementing [`HardwareExecutor`].
//!
//! Executes events instantly (or after a configurable per-frame delay),
//! returns synthetic frames and keeps a log of every executed event.

use std::sync::Arc;

use acq_core::{AcqError, AcqResult, AcquisitionEvent, RawImage};
use acq_engine::{FixedCapabilities, HardwareExecutor, SequencingCapabilities};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::pattern::{synthetic_frame, FrameKey};

/// Events executed so far, shared with the test that built the microscope.
pub type ExecutedLog = Arc<Mutex<Vec<AcquisitionEvent>>>;

/// Configuration for [`MockMicroscope`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockMicroscopeConfig {
    /// Frame width in pixels (default: 64)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels (default: 64)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Pixel bit depth (default: 16)
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u8,

    /// Camera names; every camera returns a frame per trigger. Empty means
    /// one unnamed camera.
    #[serde(default)]
    pub cameras: Vec<String>,

    /// Simulated readout time per triggered frame
    #[serde(default)]
    pub frame_delay_ms: u64,

    /// Maximum sequence length per device class
    #[serde(default)]
    pub sequencing: FixedCapabilities,

    /// Fail the Nth `execute` call (1-based)
    #[serde(default)]
    pub fail_on_event: Option<u64>,

    /// Seed for the frame noise
    #[serde(default)]
    pub seed: u64,
}

fn default_width() -> u32 {
    64
}
fn default_height() -> u32 {
    64
}
fn default_bit_depth() -> u8 {
    16
}

impl Default for MockMicroscopeConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bit_depth: default_bit_depth(),
            cameras: Vec::new(),
            frame_delay_ms: 0,
            sequencing: FixedCapabilities::default(),
            fail_on_event: None,
            seed: 0,
        }
    }
}

impl MockMicroscopeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("camera resolution must be non-zero".to_string());
        }
        if self.bit_depth == 0 || self.bit_depth > 16 {
            return Err(format!("bit depth {} outside 1..=16", self.bit_depth));
        }
        if self.fail_on_event == Some(0) {
            return Err("fail_on_event counts from 1".to_string());
        }
        Ok(())
    }
}

/// Simulated microscope.
pub struct MockMicroscope {
    name: String,
    config: MockMicroscopeConfig,
    capabilities: Arc<FixedCapabilities>,
    executed: ExecutedLog,
    channels: Vec<String>,
    calls: u64,
    frames: u64,
}

impl MockMicroscope {
    pub fn new(config: MockMicroscopeConfig) -> Self {
        Self {
            name: "mock_microscope".to_string(),
            capabilities: Arc::new(config.sequencing),
            config,
            executed: Arc::new(Mutex::new(Vec::new())),
            channels: Vec::new(),
            calls: 0,
            frames: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &MockMicroscopeConfig {
        &self.config
    }

    /// Handle on the executed-event log; stays valid after the microscope
    /// has been moved into an acquisition.
    pub fn executed_log(&self) -> ExecutedLog {
        Arc::clone(&self.executed)
    }

    /// Triggers fired so far; a burst of n elements counts n.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    fn channel_index(&mut self, name: Option<&str>) -> usize {
        let Some(name) = name else {
            return 0;
        };
        match self.channels.iter().position(|c| c == name) {
            Some(index) => index,
            None => {
                self.channels.push(name.to_string());
                self.channels.len() - 1
            }
        }
    }

    fn snap(&mut self, element: &AcquisitionEvent, sequence_index: usize) -> Vec<RawImage> {
        let key = FrameKey {
            frame: self.frames,
            z_um: element.z_position_um(),
            channel: self.channel_index(element.channel_name()),
        };
        self.frames += 1;
        let MockMicroscopeConfig {
            width,
            height,
            bit_depth,
            seed,
            ..
        } = self.config;
        let samples = synthetic_frame(width, height, bit_depth, key, seed);
        let raw = RawImage::from_u16(&samples, width, height, bit_depth)
            .with_sequence_index(sequence_index);
        if self.config.cameras.is_empty() {
            return vec![raw];
        }
        self.config
            .cameras
            .iter()
            .map(|camera| raw.clone().with_camera(camera.as_str()))
            .collect()
    }
}

#[async_trait]
impl HardwareExecutor for MockMicroscope {
    async fn execute(&mut self, event: &AcquisitionEvent) -> AcqResult<Vec<RawImage>> {
        self.calls += 1;
        if self.config.fail_on_event == Some(self.calls) {
            tracing::warn!(microscope = %self.name, call = self.calls, "injected hardware failure");
            return Err(AcqError::Hardware(format!(
                "{}: injected failure on event #{}",
                self.name, self.calls
            )));
        }
        self.executed.lock().push(event.clone());

        let elements: Vec<AcquisitionEvent> = match event.sequence() {
            Some(run) => run.to_vec(),
            None => vec![event.clone()],
        };
        let delay = Duration::from_millis(self.config.frame_delay_ms);
        let mut frames = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            frames.extend(self.snap(element, index));
        }
        tracing::debug!(
            microscope = %self.name,
            call = self.calls,
            %event,
            frames = frames.len(),
            total_frames = self.frames,
            "event executed"
        );
        Ok(frames)
    }

    fn capabilities(&self) -> Arc<dyn SequencingCapabilities> {
        Arc::clone(&self.capabilities) as Arc<dyn SequencingCapabilities>
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockMicroscope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMicroscope")
            .field("name", &self.name)
            .field("calls", &self.calls)
            .field("frames", &self.frames)
            .finish()
    }
}
