// Notifier trait - final delivery of alerts (email, chat, ...)
use crate::domain::alert::Alert;
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;

    /// Whether a failed alert goes back on the queue. Called after
    /// `retry_count` has been incremented.
    fn should_retry(&self, alert: &Alert) -> bool {
        alert.retry_count < 5
    }
}
