// Polling scheduler - samples each enabled channel on its own interval and forwards readings to persistence
use crate::application::calibration_service::CalibrationService;
use crate::application::channel_driver::ChannelDriver;
use crate::application::persistence_service::PersistenceService;
use crate::domain::channel::{ChannelConfig, ChannelTable};
use crate::domain::reading::{ChannelId, Reading};
use crate::infrastructure::config::SchedulerSettings;
use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub config: ChannelConfig,
    pub last_sample: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub channels: Vec<ChannelStatus>,
}

enum SampleOutcome {
    Recorded,
    Disabled,
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    driver: Arc<dyn ChannelDriver>,
    calibration: Arc<CalibrationService>,
    persistence: Arc<PersistenceService>,
    channels: parking_lot::RwLock<ChannelTable>,
    last_sample: parking_lot::Mutex<HashMap<ChannelId, DateTime<Local>>>,
    running: AtomicBool,
    maintenance_running: AtomicBool,
    settings: SchedulerSettings,
}

/// At most one sampling loop runs per scheduler. `stop()` waits for the loop
/// to exit, so no channel is read after it returns.
pub struct PollingScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<RunningLoop>>,
}

impl PollingScheduler {
    pub fn new(
        driver: Arc<dyn ChannelDriver>,
        calibration: Arc<CalibrationService>,
        persistence: Arc<PersistenceService>,
        settings: SchedulerSettings,
    ) -> Self {
        let channels = ChannelTable::new(settings.channel_count, settings.default_interval_secs);
        Self {
            shared: Arc::new(Shared {
                driver,
                calibration,
                persistence,
                channels: parking_lot::RwLock::new(channels),
                last_sample: parking_lot::Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                maintenance_running: AtomicBool::new(false),
                settings,
            }),
            task: Mutex::new(None),
        }
    }

    /// Returns false if a loop is already running.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            tracing::debug!("Scheduler already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(self.shared.clone(), stop_rx));
        *task = Some(RunningLoop { stop_tx, handle });

        tracing::info!(channels = self.shared.channels.read().len(), "Scheduler started");
        true
    }

    /// Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut task = self.task.lock().await;
        let Some(running) = task.take() else {
            return false;
        };

        let _ = running.stop_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Scheduler loop ended abnormally");
        }
        self.shared.running.store(false, Ordering::SeqCst);

        tracing::info!("Scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn set_channel_enabled(&self, channel: ChannelId, enabled: bool) -> bool {
        let changed = self.shared.channels.write().set_enabled(channel, enabled);
        if changed {
            tracing::info!(channel, enabled, "Channel enable flag updated");
        }
        changed
    }

    /// Rejects unknown channels and intervals under one second.
    pub fn set_channel_interval(&self, channel: ChannelId, interval_secs: u64) -> bool {
        let changed = self.shared.channels.write().set_interval(channel, interval_secs);
        if changed {
            tracing::info!(channel, interval_secs, "Channel interval updated");
        }
        changed
    }

    pub fn status(&self) -> SchedulerStatus {
        let last_sample = self.shared.last_sample.lock().clone();
        let channels = self
            .shared
            .channels
            .read()
            .all()
            .into_iter()
            .map(|config| ChannelStatus {
                last_sample: last_sample.get(&config.channel).copied(),
                config,
            })
            .collect();

        SchedulerStatus {
            running: self.is_running(),
            channels,
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.settings.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sampled_at: HashMap<ChannelId, Instant> = HashMap::new();
    let mut next_maintenance = Instant::now() + shared.settings.maintenance_interval();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        let tick = AssertUnwindSafe(shared.sample_due_channels(&mut sampled_at, &stop_rx))
            .catch_unwind()
            .await;
        let errors = match tick {
            Ok(errors) => errors,
            Err(_) => {
                tracing::error!("Sampling tick panicked");
                1
            }
        };

        if errors > 0 {
            tokio::select! {
                _ = tokio::time::sleep(shared.settings.error_backoff()) => {}
                _ = stop_rx.changed() => break,
            }
        }

        if Instant::now() >= next_maintenance {
            next_maintenance = Instant::now() + shared.settings.maintenance_interval();
            shared.spawn_maintenance();
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    tracing::debug!("Scheduler loop exited");
}

impl Shared {
    /// Samples every enabled channel whose interval has elapsed. Returns the
    /// number of channels that failed with an error.
    async fn sample_due_channels(
        &self,
        sampled_at: &mut HashMap<ChannelId, Instant>,
        stop_rx: &watch::Receiver<bool>,
    ) -> usize {
        let now = Instant::now();
        let enabled = self.channels.read().enabled();
        let mut errors = 0;

        for config in enabled {
            if *stop_rx.borrow() {
                break;
            }
            let due = sampled_at
                .get(&config.channel)
                .is_none_or(|last| now.duration_since(*last) >= config.interval());
            if !due {
                continue;
            }

            match self.sample(config.channel).await {
                Ok(SampleOutcome::Recorded) => {
                    sampled_at.insert(config.channel, now);
                }
                Ok(SampleOutcome::Disabled) => {
                    sampled_at.remove(&config.channel);
                }
                Err(e) => {
                    tracing::error!(channel = config.channel, error = %format!("{:#}", e), "Channel sample failed");
                    errors += 1;
                }
            }
        }

        errors
    }

    /// A channel that reads no value or fails to read is disabled until
    /// re-enabled. Only a reading lost by every sink is an error.
    async fn sample(&self, channel: ChannelId) -> anyhow::Result<SampleOutcome> {
        let raw = match self.driver.read_channel(channel).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.channels.write().set_enabled(channel, false);
                tracing::warn!(channel, "Channel returned no value, disabling it");
                return Ok(SampleOutcome::Disabled);
            }
            Err(e) => {
                self.channels.write().set_enabled(channel, false);
                tracing::warn!(channel, error = %e, "Channel read failed, disabling it");
                return Ok(SampleOutcome::Disabled);
            }
        };

        let calibrated = self.calibration.apply(channel, raw);
        let reading = Reading::new(channel, raw, calibrated, Local::now());
        let outcome = self.persistence.record(&reading).await;
        if outcome.is_lost() {
            anyhow::bail!("reading was not stored by any sink");
        }

        tracing::debug!(channel, raw, calibrated, "Sampled channel");
        self.last_sample.lock().insert(channel, reading.timestamp);
        Ok(SampleOutcome::Recorded)
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        if self.maintenance_running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Maintenance still running, skipping");
            return;
        }
        let shared = self.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.persistence.run_maintenance().await {
                tracing::warn!(error = %format!("{:#}", e), "Text log maintenance failed");
            }
            shared.maintenance_running.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::MemoryStore;
    use crate::infrastructure::calibration_file::CalibrationFile;
    use crate::infrastructure::config::{Settings, StorageSelection};
    use crate::infrastructure::simulated_driver::{Fault, SimulatedDriver};
    use crate::infrastructure::text_log::TextLogStore;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        driver: Arc<SimulatedDriver>,
        store: Arc<MemoryStore>,
        scheduler: PollingScheduler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_data_dir(dir.path());
        let driver = Arc::new(SimulatedDriver::connected(8));
        let store = Arc::new(MemoryStore::named("memory"));
        let text_log = Arc::new(TextLogStore::open(dir.path(), settings.text_log.clone()).unwrap());
        let persistence = Arc::new(PersistenceService::new(
            store.clone(),
            StorageSelection::from(&settings.storage),
            text_log,
            settings.clone(),
        ));
        let calibration = Arc::new(CalibrationService::load(
            CalibrationFile::new(dir.path().join("calibration.json")),
            8,
        ));
        let scheduler = PollingScheduler::new(driver.clone(), calibration, persistence, settings.scheduler);

        Fixture {
            dir,
            driver,
            store,
            scheduler,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let f = fixture();
        assert!(!f.scheduler.is_running());
        assert!(!f.scheduler.stop().await);

        assert!(f.scheduler.start().await);
        assert!(!f.scheduler.start().await);
        assert!(f.scheduler.is_running());

        assert!(f.scheduler.stop().await);
        assert!(!f.scheduler.stop().await);
        assert!(!f.scheduler.is_running());

        // restartable
        assert!(f.scheduler.start().await);
        assert!(f.scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_channel_is_disabled_and_others_keep_sampling() {
        let f = fixture();
        f.driver.inject_fault(1, Fault::NoValue);

        f.scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(16)).await;
        f.scheduler.stop().await;

        assert_eq!(f.driver.read_count(1), 1);
        assert_eq!(f.store.count_for(1), 0);
        for channel in 2..=8 {
            assert!(f.store.count_for(channel) >= 3, "channel {} under-sampled", channel);
        }
        let status = f.scheduler.status();
        assert!(!status.channels[0].config.enabled);
        assert!(status.channels[1].config.enabled);
        assert!(status.channels[0].last_sample.is_none());
        assert!(status.channels[1].last_sample.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_disables_channel_without_slowing_neighbours() {
        let f = fixture();
        f.driver.inject_fault(1, Fault::Io);
        assert!(f.scheduler.set_channel_interval(2, 1));

        f.scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        f.scheduler.stop().await;

        let status = f.scheduler.status();
        assert!(!status.channels[0].config.enabled);
        assert_eq!(f.driver.read_count(1), 1);
        assert_eq!(f.store.count_for(1), 0);
        assert!(f.store.count_for(2) >= 9, "channel 2 sampled {} times", f.store.count_for(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reading_backs_off_without_disabling() {
        let f = fixture();
        f.store.failing.store(true, Ordering::SeqCst);
        std::fs::remove_dir_all(f.dir.path().join("raw")).unwrap();

        f.scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        f.scheduler.stop().await;

        assert!(f.scheduler.status().channels.iter().all(|c| c.config.enabled));
        assert!(f.driver.read_count(1) >= 2);
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reads_after_stop_returns() {
        let f = fixture();
        f.scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        f.scheduler.stop().await;

        let counts: Vec<usize> = (1..=8).map(|ch| f.driver.read_count(ch)).collect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let after: Vec<usize> = (1..=8).map(|ch| f.driver.read_count(ch)).collect();
        assert_eq!(counts, after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_follow_their_own_interval() {
        let f = fixture();
        assert!(f.scheduler.set_channel_interval(2, 1));
        assert!(f.scheduler.set_channel_enabled(3, false));

        f.scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        f.scheduler.stop().await;

        assert!(f.store.count_for(2) >= 9);
        assert!(f.store.count_for(5) <= 3);
        assert_eq!(f.driver.read_count(3), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_settings_are_rejected() {
        let f = fixture();
        assert!(!f.scheduler.set_channel_enabled(0, true));
        assert!(!f.scheduler.set_channel_enabled(9, false));
        assert!(!f.scheduler.set_channel_interval(12, 5));
        assert!(!f.scheduler.set_channel_interval(1, 0));
    }
}
