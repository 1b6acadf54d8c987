// Durable alert queue - alerts raised while offline, kept in a JSON file until connectivity returns
use crate::domain::alert::Alert;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

pub struct DurableAlertQueue {
    path: PathBuf,
    // serialises read-modify-write of the file
    lock: Mutex<()>,
}

impl DurableAlertQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, alert: &Alert) -> Result<()> {
        let _guard = self.lock.lock();
        let mut alerts = self.read()?;
        alerts.push(alert.clone());
        self.write(&alerts)
    }

    /// Queued alerts in the order they were raised.
    pub fn load(&self) -> Result<Vec<Alert>> {
        let _guard = self.lock.lock();
        self.read()
    }

    pub fn len(&self) -> usize {
        self.load().map(|alerts| alerts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every queued alert.
    pub fn drain(&self) -> Result<Vec<Alert>> {
        let _guard = self.lock.lock();
        let alerts = self.read()?;
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(alerts)
    }

    fn read(&self) -> Result<Vec<Alert>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&content) {
            Ok(alerts) => Ok(alerts),
            Err(e) => {
                tracing::warn!(file = %self.path.display(), error = %e, "Discarding unreadable alert queue");
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, alerts: &[Alert]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(alerts)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
