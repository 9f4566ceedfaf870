//! Static channel configuration for an acquisition.

use serde::{Deserialize, Serialize};

/// One channel preset of a configuration group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name as it appears in image tags
    pub name: String,
    /// Configuration group the preset belongs to
    #[serde(default)]
    pub group: Option<String>,
    /// Preset name within the group; defaults to `name`
    #[serde(default)]
    pub config: Option<String>,
    pub exposure_ms: f64,
    /// Z offset applied on top of the stack position
    #[serde(default)]
    pub offset_um: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, exposure_ms: f64) -> Self {
        Self {
            name: name.into(),
            group: None,
            config: None,
            exposure_ms,
            offset_um: 0.0,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_offset(mut self, offset_um: f64) -> Self {
        self.offset_um = offset_um;
        self
    }

    /// Preset name, falling back to the channel name.
    pub fn config_name(&self) -> &str {
        self.config.as_deref().unwrap_or(&self.name)
    }
}

/// An ordered, name-deduplicated list of channel presets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawChannelGroup")]
pub struct ChannelGroup {
    pub name: String,
    channels: Vec<ChannelSpec>,
}

#[derive(Deserialize)]
struct RawChannelGroup {
    name: String,
    #[serde(default)]
    channels: Vec<ChannelSpec>,
}

impl From<RawChannelGroup> for ChannelGroup {
    fn from(raw: RawChannelGroup) -> Self {
        ChannelGroup::from_channels(raw.name, raw.channels)
    }
}

impl ChannelGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
        }
    }

    /// Build a group from a list; duplicates keep the first slot and the
    /// last record.
    pub fn from_channels(name: impl Into<String>, channels: Vec<ChannelSpec>) -> Self {
        let mut group = Self::new(name);
        for channel in channels {
            group.add(channel);
        }
        group
    }

    /// Add a channel. A channel with the same name replaces the existing
    /// record in place.
    pub fn add(&mut self, mut channel: ChannelSpec) {
        if channel.group.is_none() {
            channel.group = Some(self.name.clone());
        }
        match self.channels.iter_mut().find(|c| c.name == channel.name) {
            Some(existing) => *existing = channel,
            None => self.channels.push(channel),
        }
    }

    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.add(channel);
        self
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn get(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter().filter(|c| c.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Next enabled channel strictly after `current`.
    ///
    /// `None` starts the scan at the head of the list. The scan is a single
    /// forward pass without wraparound; an unknown `current` yields `None`.
    pub fn next_active_channel(&self, current: Option<&str>) -> Option<&str> {
        let start = match current {
            None => 0,
            Some(name) => self.channels.iter().position(|c| c.name == name)? + 1,
        };
        self.channels[start..]
            .iter()
            .find(|c| c.enabled)
            .map(|c| c.name.as_str())
    }
}
