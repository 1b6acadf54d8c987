// Persistence service - writes every reading to the structured store and the text log independently
use crate::application::structured_store::{StorageInfo, StructuredStore};
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use crate::infrastructure::config::{save_storage_selection, Settings, StorageSelection};
use crate::infrastructure::store_factory::open_store;
use crate::infrastructure::text_log::{MaintenanceReport, TextLogStore};
use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which sinks accepted a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub structured: bool,
    pub text: bool,
}

impl RecordOutcome {
    pub fn is_lost(&self) -> bool {
        !self.structured && !self.text
    }
}

/// Per-sink failures of a clear; sinks that succeeded stay cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub failures: Vec<String>,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistenceStatus {
    pub selection: StorageSelection,
    pub structured: Option<StorageInfo>,
    pub structured_error: Option<String>,
    pub text_log_file: Option<PathBuf>,
}

pub struct PersistenceService {
    structured: RwLock<Arc<dyn StructuredStore>>,
    selection: RwLock<StorageSelection>,
    text_log: Arc<TextLogStore>,
    settings: Settings,
}

impl PersistenceService {
    pub fn new(
        structured: Arc<dyn StructuredStore>,
        selection: StorageSelection,
        text_log: Arc<TextLogStore>,
        settings: Settings,
    ) -> Self {
        Self {
            structured: RwLock::new(structured),
            selection: RwLock::new(selection),
            text_log,
            settings,
        }
    }

    pub fn text_log(&self) -> &Arc<TextLogStore> {
        &self.text_log
    }

    /// Best-effort dual write. Never fails; each sink's failure is logged on
    /// its own and the other sink still receives the reading. The store guard
    /// is held for the whole write, so a backend switch waits for it.
    pub async fn record(&self, reading: &Reading) -> RecordOutcome {
        let store = self.structured.read().await;
        let text_log = &self.text_log;

        let (structured, text) = tokio::join!(store.insert(reading), async { text_log.append(reading) });

        let outcome = RecordOutcome {
            structured: structured.is_ok(),
            text: text.is_ok(),
        };

        if let Err(e) = &structured {
            tracing::warn!(channel = reading.channel, backend = store.name(), error = %format!("{:#}", e), "Structured store write failed");
        }
        if let Err(e) = &text {
            tracing::warn!(channel = reading.channel, error = %format!("{:#}", e), "Text log write failed");
        }
        if outcome.is_lost() {
            tracing::error!(
                channel = reading.channel,
                temperature = reading.calibrated_temperature,
                timestamp = %reading.timestamp,
                "Reading lost, both sinks failed"
            );
        }

        outcome
    }

    pub async fn query_latest(&self) -> anyhow::Result<Vec<StorageRecord>> {
        self.structured.read().await.query_latest().await
    }

    pub async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> anyhow::Result<Vec<StorageRecord>> {
        self.structured.read().await.query_range(start, end, channel).await
    }

    /// Readings from the last `hours` hours, newest first.
    pub async fn query_recent(&self, hours: i64, channel: Option<ChannelId>) -> anyhow::Result<Vec<StorageRecord>> {
        let end = Local::now();
        let start = end - Duration::hours(hours.max(0));
        let mut records = self.query_range(start, end, channel).await?;
        records.reverse();
        Ok(records)
    }

    /// Clears every sink. A failure in one does not stop the other.
    pub async fn clear_all(&self) -> ClearReport {
        let store = self.structured.read().await;
        let mut report = ClearReport::default();

        if let Err(e) = store.clear().await {
            tracing::error!(backend = store.name(), error = %format!("{:#}", e), "Failed to clear structured store");
            report.failures.push(format!("structured ({}): {:#}", store.name(), e));
        }
        if let Err(e) = self.text_log.clear() {
            tracing::error!(error = %format!("{:#}", e), "Failed to clear text log");
            report.failures.push(format!("text log: {:#}", e));
        }

        if report.is_complete() {
            tracing::info!("Cleared all stored readings");
        }
        report
    }

    /// Opens the new store, persists the selection, then swaps it in. The swap
    /// waits for in-flight writes, so the old store is idle when it is
    /// disconnected. On error the current store stays active.
    pub async fn switch_structured_backend(&self, selection: StorageSelection) -> anyhow::Result<()> {
        let new_store = open_store(&selection, &self.settings)?;
        let selection_path = self.settings.resolve(&self.settings.storage.selection_file);
        save_storage_selection(&selection_path, &selection)?;

        let old_store = {
            let mut structured = self.structured.write().await;
            std::mem::replace(&mut *structured, new_store)
        };
        *self.selection.write().await = selection.clone();
        old_store.disconnect().await;

        tracing::info!(
            backend = ?selection.backend,
            read_from = ?selection.read_from,
            previous = old_store.name(),
            "Switched structured store"
        );
        Ok(())
    }

    pub async fn status(&self) -> PersistenceStatus {
        let (structured, structured_error) = match self.structured.read().await.storage_info().await {
            Ok(info) => (Some(info), None),
            Err(e) => (None, Some(format!("{:#}", e))),
        };

        PersistenceStatus {
            selection: self.selection.read().await.clone(),
            structured,
            structured_error,
            text_log_file: self.text_log.current_file(),
        }
    }

    /// Text log rotation, cleanup and compression off the async workers.
    pub async fn run_maintenance(&self) -> anyhow::Result<MaintenanceReport> {
        let text_log = self.text_log.clone();
        let report = tokio::task::spawn_blocking(move || text_log.run_maintenance(Local::now())).await?;
        tracing::info!(
            consolidated = report.consolidated.len(),
            removed_hourly = report.removed_hourly,
            removed_daily = report.removed_daily,
            compressed = report.compressed,
            errors = report.errors.len(),
            "Text log maintenance finished"
        );
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.text_log.close();
        self.structured.read().await.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::MemoryStore;
    use crate::infrastructure::config::StoreKind;
    use chrono::TimeZone;
    use std::fs;
    use std::time::Duration as StdDuration;

    struct Fixture {
        dir: tempfile::TempDir,
        service: Arc<PersistenceService>,
        store: Arc<MemoryStore>,
    }

    fn fixture(store: MemoryStore) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_data_dir(dir.path());
        let text_log = Arc::new(TextLogStore::open(dir.path(), settings.text_log.clone()).unwrap());
        let store = Arc::new(store);
        let service = Arc::new(PersistenceService::new(
            store.clone(),
            StorageSelection::from(&settings.storage),
            text_log,
            settings,
        ));
        Fixture { dir, service, store }
    }

    fn reading(channel: ChannelId, minute: u32) -> Reading {
        let ts = Local.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap();
        Reading::new(channel, 20.0, 20.5, ts)
    }

    #[tokio::test]
    async fn test_record_reaches_both_sinks() {
        let f = fixture(MemoryStore::named("memory"));
        let outcome = f.service.record(&reading(1, 0)).await;

        assert_eq!(outcome, RecordOutcome { structured: true, text: true });
        assert_eq!(f.store.len(), 1);
        let hourly = fs::read_to_string(f.dir.path().join("raw/2024-01-15_10.txt")).unwrap();
        assert_eq!(hourly.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_failing_structured_store_does_not_block_text_log() {
        let f = fixture(MemoryStore::failing("memory"));
        for minute in 0..3 {
            let outcome = f.service.record(&reading(2, minute)).await;
            assert!(!outcome.structured);
            assert!(outcome.text);
        }

        assert!(f.service.query_latest().await.unwrap().is_empty());
        let start = Local.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let end = Local.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap();
        let logged = f.service.text_log().query_range(start, end, Some(2)).unwrap();
        assert_eq!(logged.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_text_log_does_not_block_structured_store() {
        let f = fixture(MemoryStore::named("memory"));
        fs::remove_dir_all(f.dir.path().join("raw")).unwrap();

        let outcome = f.service.record(&reading(3, 0)).await;
        assert_eq!(outcome, RecordOutcome { structured: true, text: false });
        assert_eq!(f.store.count_for(3), 1);
    }

    #[tokio::test]
    async fn test_both_sinks_failing_is_reported_not_raised() {
        let f = fixture(MemoryStore::failing("memory"));
        fs::remove_dir_all(f.dir.path().join("raw")).unwrap();
        assert!(f.service.record(&reading(1, 0)).await.is_lost());
    }

    #[tokio::test]
    async fn test_query_recent_is_newest_first() {
        let f = fixture(MemoryStore::named("memory"));
        let now = Local::now();
        for offset in [90, 30, 10] {
            let ts = now - Duration::minutes(offset);
            f.service.record(&Reading::new(1, 20.0, 20.0, ts)).await;
        }

        let recent = f.service.query_recent(1, None).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
    }

    #[tokio::test]
    async fn test_clear_all_reports_partial_failure() {
        let f = fixture(MemoryStore::named("memory"));
        f.service.record(&reading(1, 0)).await;
        f.store.failing.store(true, std::sync::atomic::Ordering::SeqCst);

        let report = f.service.clear_all().await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("structured"));
        // the text log was cleared regardless
        assert_eq!(f.service.text_log().stats().unwrap().hourly_files, 0);
    }

    #[tokio::test]
    async fn test_switch_backend_routes_new_writes_and_persists_selection() {
        let f = fixture(MemoryStore::named("memory"));
        f.service.record(&reading(1, 0)).await;

        let mut selection = f.service.status().await.selection;
        selection.backend = StoreKind::Primary;
        selection.sqlite.path = PathBuf::from("switched.db");
        f.service.switch_structured_backend(selection).await.unwrap();

        assert!(f.store.disconnected.load(std::sync::atomic::Ordering::SeqCst));
        f.service.record(&reading(1, 1)).await;
        assert_eq!(f.store.len(), 1);

        let latest = f.service.query_latest().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, Some(1));

        let saved = fs::read_to_string(f.dir.path().join("config/storage.toml")).unwrap();
        assert!(saved.contains("switched.db"));
        let status = f.service.status().await;
        assert_eq!(status.structured.unwrap().backend, "SQLite");
    }

    #[tokio::test]
    async fn test_switch_waits_for_in_flight_write() {
        let f = fixture(MemoryStore::named("memory").with_insert_delay(StdDuration::from_millis(50)));
        let mut selection = f.service.status().await.selection;
        selection.backend = StoreKind::Primary;

        let service = f.service.clone();
        let write = tokio::spawn(async move { service.record(&reading(1, 0)).await });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        f.service.switch_structured_backend(selection).await.unwrap();

        let outcome = write.await.unwrap();
        assert_eq!(outcome, RecordOutcome { structured: true, text: true });
        assert_eq!(f.store.len(), 1);
        assert!(f.store.disconnected.load(std::sync::atomic::Ordering::SeqCst));
    }
}
