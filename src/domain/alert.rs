// Alert domain model
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::Emergency => "EMERGENCY",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub retry_count: u32,
}

impl Alert {
    pub fn new(
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
        data: BTreeMap<String, String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            data,
            timestamp,
            sent: false,
            retry_count: 0,
        }
    }
}

/// Builds the key/value payload attached to an alert.
pub fn alert_data<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
