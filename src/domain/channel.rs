// Channel configuration - per-channel enable flag and sampling interval
use super::reading::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: ChannelId,
    pub enabled: bool,
    pub interval_secs: u64,
}

impl ChannelConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration for every channel `1..=count`.
///
/// Entries are created up front and never removed, so a lookup for a valid
/// channel always succeeds.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    entries: BTreeMap<ChannelId, ChannelConfig>,
}

impl ChannelTable {
    pub fn new(count: ChannelId, default_interval_secs: u64) -> Self {
        let interval_secs = default_interval_secs.max(1);
        let entries = (1..=count)
            .map(|channel| {
                (
                    channel,
                    ChannelConfig {
                        channel,
                        enabled: true,
                        interval_secs,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, channel: ChannelId) -> Option<&ChannelConfig> {
        self.entries.get(&channel)
    }

    /// Returns false for unknown channels.
    pub fn set_enabled(&mut self, channel: ChannelId, enabled: bool) -> bool {
        match self.entries.get_mut(&channel) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns false for unknown channels or an interval below one second.
    pub fn set_interval(&mut self, channel: ChannelId, interval_secs: u64) -> bool {
        if interval_secs < 1 {
            return false;
        }
        match self.entries.get_mut(&channel) {
            Some(entry) => {
                entry.interval_secs = interval_secs;
                true
            }
            None => false,
        }
    }

    pub fn enabled(&self) -> Vec<ChannelConfig> {
        self.entries.values().filter(|c| c.enabled).cloned().collect()
    }

    pub fn all(&self) -> Vec<ChannelConfig> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
