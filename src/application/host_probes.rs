// Host probes - network reachability and local machine metrics used by the health monitor
use crate::domain::health::DiskUsage;
use async_trait::async_trait;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True if at least one well-known host accepted a connection
    async fn is_reachable(&self) -> bool;
}

pub trait HostMetrics: Send + Sync {
    fn cpu_temperature(&self) -> anyhow::Result<f64>;

    fn disk_usage(&self) -> anyhow::Result<DiskUsage>;
}
