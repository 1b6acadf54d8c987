// Test doubles for the application traits
use crate::application::host_probes::{ConnectivityProbe, HostMetrics};
use crate::application::notifier::Notifier;
use crate::application::structured_store::{StorageInfo, StructuredStore};
use crate::domain::alert::Alert;
use crate::domain::health::DiskUsage;
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Structured store kept in memory. Inserts fail while `failing` is set or
/// once disconnected.
#[derive(Default)]
pub struct MemoryStore {
    pub name: String,
    pub records: Mutex<Vec<StorageRecord>>,
    pub failing: AtomicBool,
    pub disconnected: AtomicBool,
    pub insert_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn failing(name: &str) -> Self {
        let store = Self::named(name);
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn count_for(&self, channel: ChannelId) -> usize {
        self.records.lock().iter().filter(|r| r.channel == channel).count()
    }
}

#[async_trait]
impl StructuredStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, reading: &Reading) -> Result<()> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.name);
        }
        if self.disconnected.load(Ordering::SeqCst) {
            anyhow::bail!("{} is disconnected", self.name);
        }
        let mut records = self.records.lock();
        let id = records.len() as i64 + 1;
        records.push(StorageRecord::new(
            Some(id),
            reading.timestamp,
            reading.channel,
            reading.calibrated_temperature,
        ));
        Ok(())
    }

    async fn query_latest(&self) -> Result<Vec<StorageRecord>> {
        let records = self.records.lock();
        let mut latest: Vec<StorageRecord> = Vec::new();
        for record in records.iter() {
            match latest.iter_mut().find(|r| r.channel == record.channel) {
                Some(existing) if existing.timestamp <= record.timestamp => *existing = record.clone(),
                Some(_) => {}
                None => latest.push(record.clone()),
            }
        }
        latest.sort_by_key(|r| r.channel);
        Ok(latest)
    }

    async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<StorageRecord>> {
        let mut records: Vec<StorageRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .filter(|r| channel.is_none_or(|ch| r.channel == ch))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.name);
        }
        self.records.lock().clear();
        Ok(())
    }

    async fn storage_info(&self) -> Result<StorageInfo> {
        Ok(StorageInfo {
            backend: self.name.clone(),
            location: "memory".to_string(),
            record_count: self.len() as u64,
            size_bytes: None,
        })
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Notifier that records deliveries, or fails every delivery while `failing`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<Alert>>,
    pub attempts: AtomicUsize,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|a| a.title.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("delivery channel down");
        }
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

/// Probe whose answer is set by the test.
pub struct FakeProbe {
    pub reachable: AtomicBool,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Host metrics whose values are set by the test. `None` makes the read fail.
#[derive(Default)]
pub struct FakeMetrics {
    pub cpu: Mutex<Option<f64>>,
    pub disk: Mutex<Option<DiskUsage>>,
}

impl FakeMetrics {
    pub fn set_cpu(&self, celsius: Option<f64>) {
        *self.cpu.lock() = celsius;
    }

    pub fn set_disk_percent(&self, percent: f64) {
        *self.disk.lock() = Some(DiskUsage {
            total_bytes: 1000,
            available_bytes: (1000.0 - percent * 10.0) as u64,
        });
    }
}

impl HostMetrics for FakeMetrics {
    fn cpu_temperature(&self) -> Result<f64> {
        self.cpu
            .lock()
            .ok_or_else(|| anyhow::anyhow!("no temperature sensor"))
    }

    fn disk_usage(&self) -> Result<DiskUsage> {
        self.disk
            .lock()
            .ok_or_else(|| anyhow::anyhow!("disk not mounted"))
    }
}
