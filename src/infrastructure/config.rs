use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub scheduler: SchedulerSettings,
    pub storage: StorageSettings,
    pub text_log: TextLogSettings,
    pub calibration: CalibrationSettings,
    pub health: HealthSettings,
    pub alerts: AlertSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            scheduler: SchedulerSettings::default(),
            storage: StorageSettings::default(),
            text_log: TextLogSettings::default(),
            calibration: CalibrationSettings::default(),
            health: HealthSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl Settings {
    /// Resolves a configured path against `data_dir` unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SchedulerSettings {
    pub channel_count: u8,
    pub default_interval_secs: u64,
    pub tick_millis: u64,
    pub error_backoff_millis: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            channel_count: 8,
            default_interval_secs: 5,
            tick_millis: 500,
            error_backoff_millis: 2000,
            maintenance_interval_secs: 3600,
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_millis)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Which structured store implementation receives readings.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Embedded SQLite file.
    Primary,
    /// InfluxDB over HTTP.
    Secondary,
    /// Write to both, read from `read_from`.
    Dual,
}

/// Which store answers queries when writing to both.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Primary,
    Secondary,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StoreKind,
    pub read_from: ReadSource,
    pub sqlite: SqliteSettings,
    pub influx: InfluxSettings,
    pub selection_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StoreKind::Primary,
            read_from: ReadSource::Primary,
            sqlite: SqliteSettings::default(),
            influx: InfluxSettings::default(),
            selection_file: PathBuf::from("config/storage.toml"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SqliteSettings {
    pub path: PathBuf,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("datalogger.db"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    pub timeout_secs: u64,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:8086".to_string(),
            token: String::new(),
            database: "datalogger".to_string(),
            retention_policy: "autogen".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TextLogSettings {
    pub hourly_retention_hours: i64,
    pub daily_retention_days: i64,
    pub compress_after_days: i64,
}

impl Default for TextLogSettings {
    fn default() -> Self {
        Self {
            hourly_retention_hours: 48,
            daily_retention_days: 30,
            compress_after_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CalibrationSettings {
    pub path: PathBuf,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("calibration.json"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HealthSettings {
    pub tick_millis: u64,
    pub internet_check_secs: u64,
    pub hardware_check_secs: u64,
    pub cpu_check_secs: u64,
    pub disk_check_secs: u64,
    pub logging_check_secs: u64,
    pub internet_hosts: Vec<String>,
    pub connect_timeout_millis: u64,
    pub cpu_warning_celsius: f64,
    pub cpu_critical_celsius: f64,
    pub warning_streak: u32,
    pub disk_warning_percent: f64,
    pub disk_critical_percent: f64,
    pub disk_path: PathBuf,
    pub thermal_zone_path: PathBuf,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            internet_check_secs: 30,
            hardware_check_secs: 30,
            cpu_check_secs: 60,
            disk_check_secs: 300,
            logging_check_secs: 120,
            internet_hosts: vec![
                "8.8.8.8:53".to_string(),
                "1.1.1.1:53".to_string(),
                "208.67.222.222:53".to_string(),
            ],
            connect_timeout_millis: 5000,
            cpu_warning_celsius: 70.0,
            cpu_critical_celsius: 80.0,
            warning_streak: 3,
            disk_warning_percent: 85.0,
            disk_critical_percent: 95.0,
            disk_path: PathBuf::from("/"),
            thermal_zone_path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
        }
    }
}

impl HealthSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AlertSettings {
    pub suppression_minutes: i64,
    pub queue_file: PathBuf,
    pub retry_delay_secs: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            suppression_minutes: 30,
            queue_file: PathBuf::from("queued_alerts.json"),
            retry_delay_secs: 30,
        }
    }
}

impl AlertSettings {
    pub fn suppression_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.suppression_minutes)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Structured store selection as persisted by a backend switch.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageSelection {
    pub backend: StoreKind,
    pub read_from: ReadSource,
    pub sqlite: SqliteSettings,
    pub influx: InfluxSettings,
}

impl From<&StorageSettings> for StorageSelection {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            backend: settings.backend,
            read_from: settings.read_from,
            sqlite: settings.sqlite.clone(),
            influx: settings.influx.clone(),
        }
    }
}

#[derive(Serialize)]
struct SelectionFile<'a> {
    storage: &'a StorageSelection,
}

#[derive(Deserialize)]
struct SavedSelection {
    storage: StorageSelection,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/datalogger").required(false))
        .add_source(
            config::Environment::with_prefix("DATALOGGER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Reads a selection saved by a previous backend switch, if any.
pub fn load_storage_selection(path: &Path) -> anyhow::Result<Option<StorageSelection>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let saved: SavedSelection =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(saved.storage))
}

/// Writes the backend selection so the next start uses it.
pub fn save_storage_selection(path: &Path, selection: &StorageSelection) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&SelectionFile { storage: selection })?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.scheduler.channel_count, 8);
        assert_eq!(settings.text_log.hourly_retention_hours, 48);
        assert_eq!(settings.text_log.daily_retention_days, 30);
        assert_eq!(settings.text_log.compress_after_days, 7);
        assert_eq!(settings.alerts.suppression_minutes, 30);
        assert_eq!(settings.storage.backend, StoreKind::Primary);
        assert_eq!(settings.health.internet_hosts.len(), 3);
    }

    #[test]
    fn test_resolve_relative_to_data_dir() {
        let settings = Settings::default().with_data_dir("/var/lib/logger");
        assert_eq!(
            settings.resolve(Path::new("datalogger.db")),
            PathBuf::from("/var/lib/logger/datalogger.db")
        );
        assert_eq!(settings.resolve(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[scheduler]\ndefault_interval_secs = 10\n[storage]\nbackend = \"dual\"\nread_from = \"secondary\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.scheduler.default_interval_secs, 10);
        assert_eq!(settings.scheduler.channel_count, 8);
        assert_eq!(settings.storage.backend, StoreKind::Dual);
        assert_eq!(settings.storage.read_from, ReadSource::Secondary);
        assert_eq!(settings.storage.sqlite.path, PathBuf::from("datalogger.db"));
    }

    #[test]
    fn test_saved_selection_round_trips_through_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/storage.toml");
        let mut selection = StorageSelection::from(&StorageSettings::default());
        selection.backend = StoreKind::Secondary;
        selection.influx.database = "kiln".to_string();

        save_storage_selection(&path, &selection).unwrap();

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.storage.backend, StoreKind::Secondary);
        assert_eq!(settings.storage.influx.database, "kiln");

        let loaded = load_storage_selection(&path).unwrap().unwrap();
        assert_eq!(loaded.backend, StoreKind::Secondary);
        assert!(load_storage_selection(&dir.path().join("missing.toml")).unwrap().is_none());
    }
}
