// SQLite store - embedded, file-backed structured store
use crate::application::structured_store::{StorageInfo, StructuredStore};
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        channel INTEGER NOT NULL,
        temperature REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp);
    CREATE INDEX IF NOT EXISTS idx_readings_channel ON readings(channel);
";

/// Timestamps are stored as Unix milliseconds so ordering is numeric.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;
        conn.execute_batch(SCHEMA).context("Failed to create readings table")?;

        tracing::info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().context("SQLite store is disconnected")?;
            f(conn).context("SQLite query failed")
        })
        .await
        .context("SQLite worker panicked")?
    }
}

fn to_millis(ts: &DateTime<Local>) -> i64 {
    ts.timestamp_millis()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StorageRecord> {
    let millis: i64 = row.get(1)?;
    let timestamp = Local
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| rusqlite::Error::IntegralValueOutOfRange(1, millis))?;
    Ok(StorageRecord::new(
        Some(row.get(0)?),
        timestamp,
        row.get(2)?,
        row.get(3)?,
    ))
}

#[async_trait]
impl StructuredStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, reading: &Reading) -> Result<()> {
        let millis = to_millis(&reading.timestamp);
        let channel = reading.channel;
        let temperature = reading.calibrated_temperature;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO readings (timestamp, channel, temperature) VALUES (?1, ?2, ?3)",
                params![millis, channel, temperature],
            )
            .map(|_| ())
        })
        .await
    }

    async fn query_latest(&self) -> Result<Vec<StorageRecord>> {
        // SQLite takes bare columns from the row that holds MAX(timestamp)
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, MAX(timestamp), channel, temperature
                 FROM readings
                 GROUP BY channel
                 ORDER BY channel",
            )?;
            let rows = stmt.query_map([], record_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<StorageRecord>> {
        let start = to_millis(&start);
        let end = to_millis(&end);
        self.with_conn(move |conn| match channel {
            Some(channel) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, timestamp, channel, temperature
                     FROM readings
                     WHERE timestamp BETWEEN ?1 AND ?2 AND channel = ?3
                     ORDER BY timestamp, id",
                )?;
                let rows = stmt.query_map(params![start, end, channel], record_from_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, timestamp, channel, temperature
                     FROM readings
                     WHERE timestamp BETWEEN ?1 AND ?2
                     ORDER BY timestamp, id",
                )?;
                let rows = stmt.query_map(params![start, end], record_from_row)?;
                rows.collect()
            }
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM readings", []).map(|_| ()))
            .await
    }

    async fn storage_info(&self) -> Result<StorageInfo> {
        let record_count: i64 = self
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0)))
            .await?;
        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).ok();

        Ok(StorageInfo {
            backend: "SQLite".to_string(),
            location: self.path.display().to_string(),
            record_count: record_count.max(0) as u64,
            size_bytes,
        })
    }

    async fn disconnect(&self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Failed to close SQLite connection cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(channel: ChannelId, temperature: f64, ts: DateTime<Local>) -> Reading {
        Reading::new(channel, temperature, temperature, ts)
    }

    #[tokio::test]
    async fn test_latest_returns_one_record_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("readings.db")).unwrap();
        let t0 = Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();

        store.insert(&reading(1, 20.0, t0)).await.unwrap();
        store.insert(&reading(1, 21.0, t0 + Duration::seconds(5))).await.unwrap();
        store.insert(&reading(2, 30.0, t0 + Duration::seconds(1))).await.unwrap();

        let latest = store.query_latest().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].channel, 1);
        assert_eq!(latest[0].temperature, 21.0);
        assert_eq!(latest[0].timestamp, t0 + Duration::seconds(5));
        assert_eq!(latest[1].channel, 2);
        assert_eq!(latest[1].temperature, 30.0);
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("readings.db")).unwrap();
        let t0 = Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();

        for (i, ch) in [3u8, 1, 2, 1, 3].iter().enumerate() {
            let ts = t0 + Duration::minutes(4 - i as i64);
            store.insert(&reading(*ch, i as f64, ts)).await.unwrap();
        }

        let all = store
            .query_range(t0 + Duration::minutes(1), t0 + Duration::minutes(3), None)
            .await
            .unwrap();
        let minutes: Vec<i64> = all.iter().map(|r| (r.timestamp - t0).num_minutes()).collect();
        assert_eq!(minutes, vec![1, 2, 3]);

        let channel_1 = store
            .query_range(t0, t0 + Duration::minutes(4), Some(1))
            .await
            .unwrap();
        assert_eq!(channel_1.len(), 2);
        assert!(channel_1.iter().all(|r| r.channel == 1));
        assert!(channel_1[0].timestamp <= channel_1[1].timestamp);
    }

    #[tokio::test]
    async fn test_clear_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("readings.db")).unwrap();
        store.insert(&reading(1, 20.0, Local::now())).await.unwrap();

        let info = store.storage_info().await.unwrap();
        assert_eq!(info.record_count, 1);
        assert_eq!(info.backend, "SQLite");

        store.clear().await.unwrap();
        assert_eq!(store.storage_info().await.unwrap().record_count, 0);
        assert!(store.query_latest().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_store_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("readings.db")).unwrap();
        store.disconnect().await;
        assert!(store.insert(&reading(1, 20.0, Local::now())).await.is_err());
    }
}
