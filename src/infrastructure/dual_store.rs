// Dual store - fans writes out to both structured stores, reads from one
use crate::application::structured_store::{StorageInfo, StructuredStore};
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use crate::infrastructure::config::ReadSource;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;

pub struct DualStore {
    primary: Arc<dyn StructuredStore>,
    secondary: Arc<dyn StructuredStore>,
    read_from: ReadSource,
}

impl DualStore {
    pub fn new(
        primary: Arc<dyn StructuredStore>,
        secondary: Arc<dyn StructuredStore>,
        read_from: ReadSource,
    ) -> Self {
        Self {
            primary,
            secondary,
            read_from,
        }
    }

    fn reader(&self) -> &Arc<dyn StructuredStore> {
        match self.read_from {
            ReadSource::Primary => &self.primary,
            ReadSource::Secondary => &self.secondary,
        }
    }
}

#[async_trait]
impl StructuredStore for DualStore {
    fn name(&self) -> &str {
        "dual"
    }

    /// Succeeds if either store accepted the reading.
    async fn insert(&self, reading: &Reading) -> Result<()> {
        let (primary, secondary) =
            tokio::join!(self.primary.insert(reading), self.secondary.insert(reading));

        match (primary, secondary) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                tracing::warn!(channel = reading.channel, store = self.primary.name(), error = %e, "Dual write degraded to a single store");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::warn!(channel = reading.channel, store = self.secondary.name(), error = %e, "Dual write degraded to a single store");
                Ok(())
            }
            (Err(p), Err(s)) => {
                anyhow::bail!(
                    "both stores rejected the reading ({}: {}; {}: {})",
                    self.primary.name(),
                    p,
                    self.secondary.name(),
                    s
                )
            }
        }
    }

    async fn query_latest(&self) -> Result<Vec<StorageRecord>> {
        self.reader().query_latest().await
    }

    async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<StorageRecord>> {
        self.reader().query_range(start, end, channel).await
    }

    async fn clear(&self) -> Result<()> {
        let (primary, secondary) = tokio::join!(self.primary.clear(), self.secondary.clear());
        let failures: Vec<String> = [(self.primary.name(), primary), (self.secondary.name(), secondary)]
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| format!("{}: {}", name, e)))
            .collect();
        if !failures.is_empty() {
            anyhow::bail!("clear failed for {}", failures.join("; "));
        }
        Ok(())
    }

    async fn storage_info(&self) -> Result<StorageInfo> {
        let mut info = self.reader().storage_info().await?;
        info.backend = format!("Dual (reading from {})", info.backend);
        Ok(info)
    }

    async fn disconnect(&self) {
        tokio::join!(self.primary.disconnect(), self.secondary.disconnect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::MemoryStore;

    fn reading(channel: ChannelId) -> Reading {
        Reading::new(channel, 20.0, 20.0, Local::now())
    }

    #[tokio::test]
    async fn test_writes_reach_both_stores() {
        let primary = Arc::new(MemoryStore::named("sqlite"));
        let secondary = Arc::new(MemoryStore::named("influx"));
        let dual = DualStore::new(primary.clone(), secondary.clone(), ReadSource::Primary);

        dual.insert(&reading(1)).await.unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(secondary.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_store_is_absorbed() {
        let primary = Arc::new(MemoryStore::failing("sqlite"));
        let secondary = Arc::new(MemoryStore::named("influx"));
        let dual = DualStore::new(primary.clone(), secondary.clone(), ReadSource::Secondary);

        dual.insert(&reading(2)).await.unwrap();
        assert_eq!(secondary.len(), 1);
        assert_eq!(dual.query_latest().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_an_error() {
        let dual = DualStore::new(
            Arc::new(MemoryStore::failing("sqlite")),
            Arc::new(MemoryStore::failing("influx")),
            ReadSource::Primary,
        );
        let err = dual.insert(&reading(1)).await.unwrap_err();
        assert!(err.to_string().contains("both stores"));
    }

    #[tokio::test]
    async fn test_reads_come_from_selected_store() {
        let primary = Arc::new(MemoryStore::named("sqlite"));
        let secondary = Arc::new(MemoryStore::named("influx"));
        primary.insert(&reading(1)).await.unwrap();

        let from_primary = DualStore::new(primary.clone(), secondary.clone(), ReadSource::Primary);
        let from_secondary = DualStore::new(primary, secondary, ReadSource::Secondary);

        assert_eq!(from_primary.query_latest().await.unwrap().len(), 1);
        assert!(from_secondary.query_latest().await.unwrap().is_empty());
        assert_eq!(
            from_secondary.storage_info().await.unwrap().backend,
            "Dual (reading from influx)"
        );
    }
}
