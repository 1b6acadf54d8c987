// Application context - owns every service and wires them together
use crate::application::alert_dispatcher::AlertDispatcher;
use crate::application::calibration_service::CalibrationService;
use crate::application::channel_driver::ChannelDriver;
use crate::application::health_monitor::HealthMonitor;
use crate::application::host_probes::{ConnectivityProbe, HostMetrics};
use crate::application::notifier::Notifier;
use crate::application::persistence_service::PersistenceService;
use crate::application::polling_scheduler::PollingScheduler;
use crate::infrastructure::alert_queue_file::DurableAlertQueue;
use crate::infrastructure::calibration_file::CalibrationFile;
use crate::infrastructure::config::{load_storage_selection, Settings, StorageSelection};
use crate::infrastructure::store_factory::open_store;
use crate::infrastructure::system_metrics::SystemMetrics;
use crate::infrastructure::tcp_probe::TcpProbe;
use crate::infrastructure::text_log::TextLogStore;
use anyhow::Context;
use std::sync::Arc;

pub struct AppContext {
    pub settings: Settings,
    pub driver: Arc<dyn ChannelDriver>,
    pub calibration: Arc<CalibrationService>,
    pub persistence: Arc<PersistenceService>,
    pub scheduler: Arc<PollingScheduler>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub monitor: Arc<HealthMonitor>,
}

impl AppContext {
    /// Builds the context with the host probes from `settings.health`.
    pub fn build(settings: Settings, driver: Arc<dyn ChannelDriver>, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let probe = Arc::new(TcpProbe::new(
            settings.health.internet_hosts.clone(),
            settings.health.connect_timeout(),
        ));
        let metrics = Arc::new(SystemMetrics::new(
            settings.health.thermal_zone_path.clone(),
            settings.health.disk_path.clone(),
        ));
        Self::build_with(settings, driver, notifier, probe, metrics)
    }

    pub fn build_with(
        settings: Settings,
        driver: Arc<dyn ChannelDriver>,
        notifier: Arc<dyn Notifier>,
        probe: Arc<dyn ConnectivityProbe>,
        metrics: Arc<dyn HostMetrics>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)
            .with_context(|| format!("Failed to create data directory {}", settings.data_dir.display()))?;

        let selection = saved_selection(&settings);
        let structured = open_store(&selection, &settings)?;
        let text_log = Arc::new(TextLogStore::open(&settings.data_dir, settings.text_log.clone())?);
        let persistence = Arc::new(PersistenceService::new(structured, selection, text_log, settings.clone()));

        let calibration = Arc::new(CalibrationService::load(
            CalibrationFile::new(settings.resolve(&settings.calibration.path)),
            settings.scheduler.channel_count,
        ));

        let scheduler = Arc::new(PollingScheduler::new(
            driver.clone(),
            calibration.clone(),
            persistence.clone(),
            settings.scheduler.clone(),
        ));

        let dispatcher = Arc::new(AlertDispatcher::new(
            notifier,
            DurableAlertQueue::new(settings.resolve(&settings.alerts.queue_file)),
            settings.alerts.clone(),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            driver.clone(),
            probe,
            metrics,
            dispatcher.clone(),
            scheduler.clone(),
            settings.health.clone(),
        ));

        tracing::info!(data_dir = %settings.data_dir.display(), "Application context ready");

        Ok(Self {
            settings,
            driver,
            calibration,
            persistence,
            scheduler,
            dispatcher,
            monitor,
        })
    }

    /// Connects the board and starts both loops. A board that fails to
    /// connect is left to the health monitor to report.
    pub async fn start(&self) {
        if !self.driver.connect().await {
            tracing::warn!("Thermocouple board did not connect");
        }
        self.scheduler.start().await;
        self.monitor.start().await;
    }

    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        self.scheduler.stop().await;
        self.persistence.shutdown().await;
        self.driver.disconnect().await;
        tracing::info!("Shutdown complete");
    }
}

/// The selection saved by the last backend switch, else the configured one.
fn saved_selection(settings: &Settings) -> StorageSelection {
    let path = settings.resolve(&settings.storage.selection_file);
    match load_storage_selection(&path) {
        Ok(Some(selection)) => {
            tracing::info!(file = %path.display(), "Using saved storage selection");
            selection
        }
        Ok(None) => StorageSelection::from(&settings.storage),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "Ignoring unreadable storage selection");
            StorageSelection::from(&settings.storage)
        }
    }
}
