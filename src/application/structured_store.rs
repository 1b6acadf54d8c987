// Repository trait for structured reading storage
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageInfo {
    pub backend: String,
    pub location: String,
    pub record_count: u64,
    pub size_bytes: Option<u64>,
}

#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Short backend name used in logs and status output
    fn name(&self) -> &str;

    async fn insert(&self, reading: &Reading) -> anyhow::Result<()>;

    /// Most recent record per channel, ordered by channel
    async fn query_latest(&self) -> anyhow::Result<Vec<StorageRecord>>;

    /// Records with `start <= timestamp <= end`, ascending by timestamp
    async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> anyhow::Result<Vec<StorageRecord>>;

    async fn clear(&self) -> anyhow::Result<()>;

    async fn storage_info(&self) -> anyhow::Result<StorageInfo>;

    async fn disconnect(&self);
}
