// Log notifier - delivers alerts to the service log
use crate::application::notifier::Notifier;
use crate::domain::alert::{Alert, AlertLevel};
use async_trait::async_trait;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let data = serde_json::to_string(&alert.data)?;
        match alert.level {
            AlertLevel::Info => {
                tracing::info!(severity = %alert.level, title = %alert.title, data = %data, "{}", alert.message)
            }
            AlertLevel::Warning => {
                tracing::warn!(severity = %alert.level, title = %alert.title, data = %data, "{}", alert.message)
            }
            AlertLevel::Critical | AlertLevel::Emergency => {
                tracing::error!(severity = %alert.level, title = %alert.title, data = %data, "{}", alert.message)
            }
        }
        Ok(())
    }
}
