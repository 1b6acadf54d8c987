// Health domain models - connectivity state and threshold trackers with hysteresis
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Internet,
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub subject: Subject,
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Local>>,
}

impl ConnectivityState {
    /// Starts out assumed connected, so a healthy start raises nothing.
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            connected: true,
            consecutive_failures: 0,
            last_check: None,
        }
    }

    /// Records a probe result, returning the transition if the state flipped.
    pub fn observe(&mut self, connected: bool, now: DateTime<Local>) -> Option<Transition> {
        self.last_check = Some(now);
        if connected {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }

        let changed = connected != self.connected;
        self.connected = connected;
        match (changed, connected) {
            (false, _) => None,
            (true, true) => Some(Transition::Connected),
            (true, false) => Some(Transition::Disconnected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    Normal,
    Warning,
    Critical,
}

impl ThresholdLevel {
    pub fn classify(value: f64, warning: f64, critical: f64) -> Self {
        if value >= critical {
            ThresholdLevel::Critical
        } else if value >= warning {
            ThresholdLevel::Warning
        } else {
            ThresholdLevel::Normal
        }
    }
}

/// CPU temperature tracker.
///
/// A critical reading escalates at once. Warning-level readings escalate only
/// after `warning_streak` consecutive readings at or above the warning
/// threshold. Each escalation is reported once until the temperature drops
/// back to normal.
#[derive(Debug, Clone)]
pub struct TemperatureTracker {
    warning: f64,
    critical: f64,
    warning_streak: u32,
    consecutive_high: u32,
    reported: ThresholdLevel,
}

impl TemperatureTracker {
    pub fn new(warning: f64, critical: f64, warning_streak: u32) -> Self {
        Self {
            warning,
            critical,
            warning_streak: warning_streak.max(1),
            consecutive_high: 0,
            reported: ThresholdLevel::Normal,
        }
    }

    pub fn consecutive_high(&self) -> u32 {
        self.consecutive_high
    }

    pub fn observe(&mut self, celsius: f64) -> Option<ThresholdLevel> {
        match ThresholdLevel::classify(celsius, self.warning, self.critical) {
            ThresholdLevel::Critical => {
                self.consecutive_high += 1;
                if self.reported != ThresholdLevel::Critical {
                    self.reported = ThresholdLevel::Critical;
                    return Some(ThresholdLevel::Critical);
                }
                None
            }
            ThresholdLevel::Warning => {
                self.consecutive_high += 1;
                match self.reported {
                    ThresholdLevel::Normal if self.consecutive_high >= self.warning_streak => {
                        self.reported = ThresholdLevel::Warning;
                        Some(ThresholdLevel::Warning)
                    }
                    ThresholdLevel::Critical => {
                        // cooling from critical into warning range
                        self.reported = ThresholdLevel::Warning;
                        None
                    }
                    _ => None,
                }
            }
            ThresholdLevel::Normal => {
                self.consecutive_high = 0;
                self.reported = ThresholdLevel::Normal;
                None
            }
        }
    }
}

/// Disk usage tracker; reports only upward threshold crossings.
#[derive(Debug, Clone)]
pub struct DiskTracker {
    warning: f64,
    critical: f64,
    level: ThresholdLevel,
}

impl DiskTracker {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            level: ThresholdLevel::Normal,
        }
    }

    pub fn observe(&mut self, usage_percent: f64) -> Option<ThresholdLevel> {
        let level = ThresholdLevel::classify(usage_percent, self.warning, self.critical);
        let previous = std::mem::replace(&mut self.level, level);
        (level > previous).then_some(level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Latest view of every health check, for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub internet: ConnectivityState,
    pub hardware: ConnectivityState,
    pub cpu_temperature: Option<f64>,
    pub disk: Option<DiskUsage>,
    pub logging_running: bool,
    pub updated_at: Option<DateTime<Local>>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            internet: ConnectivityState::new(Subject::Internet),
            hardware: ConnectivityState::new(Subject::Hardware),
            cpu_temperature: None,
            disk: None,
            logging_running: false,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_is_edge_triggered() {
        let now = Local::now();
        let mut state = ConnectivityState::new(Subject::Internet);

        assert_eq!(state.observe(true, now), None);
        assert_eq!(state.observe(false, now), Some(Transition::Disconnected));
        assert_eq!(state.observe(false, now), None);
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.observe(true, now), Some(Transition::Connected));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_check, Some(now));
    }

    #[test]
    fn test_warning_needs_three_consecutive_readings() {
        let mut tracker = TemperatureTracker::new(70.0, 80.0, 3);
        assert_eq!(tracker.observe(72.0), None);
        assert_eq!(tracker.observe(73.0), None);
        assert_eq!(tracker.observe(74.0), Some(ThresholdLevel::Warning));
        assert_eq!(tracker.observe(74.0), None);
    }

    #[test]
    fn test_transient_spike_resets_streak() {
        let mut tracker = TemperatureTracker::new(70.0, 80.0, 3);
        assert_eq!(tracker.observe(72.0), None);
        assert_eq!(tracker.observe(72.0), None);
        assert_eq!(tracker.observe(50.0), None);
        assert_eq!(tracker.consecutive_high(), 0);
        assert_eq!(tracker.observe(72.0), None);
        assert_eq!(tracker.observe(72.0), None);
        assert_eq!(tracker.observe(72.0), Some(ThresholdLevel::Warning));
    }

    #[test]
    fn test_critical_alerts_immediately() {
        let mut tracker = TemperatureTracker::new(70.0, 80.0, 3);
        assert_eq!(tracker.observe(85.0), Some(ThresholdLevel::Critical));
        assert_eq!(tracker.observe(86.0), None);
        // cooling into warning range does not re-alert
        assert_eq!(tracker.observe(75.0), None);
        assert_eq!(tracker.observe(85.0), Some(ThresholdLevel::Critical));
    }

    #[test]
    fn test_disk_reports_upward_crossings_only() {
        let mut tracker = DiskTracker::new(85.0, 95.0);
        assert_eq!(tracker.observe(50.0), None);
        assert_eq!(tracker.observe(90.0), Some(ThresholdLevel::Warning));
        assert_eq!(tracker.observe(91.0), None);
        assert_eq!(tracker.observe(96.0), Some(ThresholdLevel::Critical));
        assert_eq!(tracker.observe(90.0), None);
        assert_eq!(tracker.observe(96.0), Some(ThresholdLevel::Critical));
    }

    #[test]
    fn test_disk_usage_percent() {
        let usage = DiskUsage {
            total_bytes: 200,
            available_bytes: 50,
        };
        assert_eq!(usage.used_bytes(), 150);
        assert_eq!(usage.usage_percent(), 75.0);
    }
}
