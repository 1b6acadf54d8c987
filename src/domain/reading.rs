// Reading domain models - samples as produced by the scheduler and as stored by each sink
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Thermocouple input number, 1-based.
pub type ChannelId = u8;

/// Unit written to every text log line.
pub const CELSIUS: &str = "C";

/// One calibrated sample. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub channel: ChannelId,
    pub raw_temperature: f64,
    pub calibrated_temperature: f64,
    pub timestamp: DateTime<Local>,
}

impl Reading {
    pub fn new(
        channel: ChannelId,
        raw_temperature: f64,
        calibrated_temperature: f64,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            channel,
            raw_temperature,
            calibrated_temperature,
            timestamp,
        }
    }
}

/// A reading as kept by a structured store.
///
/// `id` is assigned by stores that have row identity (SQLite); time-series
/// backends leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Local>,
    pub channel: ChannelId,
    pub temperature: f64,
}

impl StorageRecord {
    pub fn new(id: Option<i64>, timestamp: DateTime<Local>, channel: ChannelId, temperature: f64) -> Self {
        Self {
            id,
            timestamp,
            channel,
            temperature,
        }
    }
}

/// A reading as kept by the text log (one CSV-like line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLogRecord {
    pub timestamp: DateTime<Local>,
    pub channel: ChannelId,
    pub raw_temperature: f64,
    pub calibrated_temperature: f64,
    pub unit: String,
}

impl From<&Reading> for TextLogRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            channel: reading.channel,
            raw_temperature: reading.raw_temperature,
            calibrated_temperature: reading.calibrated_temperature,
            unit: CELSIUS.to_string(),
        }
    }
}
