// Health monitor - periodic connectivity and host checks with edge-triggered alerting
use crate::application::alert_dispatcher::AlertDispatcher;
use crate::application::channel_driver::ChannelDriver;
use crate::application::host_probes::{ConnectivityProbe, HostMetrics};
use crate::application::polling_scheduler::PollingScheduler;
use crate::domain::alert::{alert_data, AlertLevel};
use crate::domain::health::{
    ConnectivityState, DiskTracker, DiskUsage, HealthSnapshot, Subject, TemperatureTracker, ThresholdLevel,
    Transition,
};
use crate::infrastructure::config::HealthSettings;
use chrono::Local;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

struct MonitorState {
    internet: ConnectivityState,
    hardware: ConnectivityState,
    cpu: TemperatureTracker,
    disk: DiskTracker,
    logging_running: Option<bool>,
}

struct Inner {
    driver: Arc<dyn ChannelDriver>,
    probe: Arc<dyn ConnectivityProbe>,
    metrics: Arc<dyn HostMetrics>,
    dispatcher: Arc<AlertDispatcher>,
    scheduler: Arc<PollingScheduler>,
    settings: HealthSettings,
    state: parking_lot::Mutex<MonitorState>,
    snapshot: parking_lot::RwLock<HealthSnapshot>,
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct HealthMonitor {
    inner: Arc<Inner>,
    task: Mutex<Option<RunningLoop>>,
}

impl HealthMonitor {
    pub fn new(
        driver: Arc<dyn ChannelDriver>,
        probe: Arc<dyn ConnectivityProbe>,
        metrics: Arc<dyn HostMetrics>,
        dispatcher: Arc<AlertDispatcher>,
        scheduler: Arc<PollingScheduler>,
        settings: HealthSettings,
    ) -> Self {
        let state = MonitorState {
            internet: ConnectivityState::new(Subject::Internet),
            hardware: ConnectivityState::new(Subject::Hardware),
            cpu: TemperatureTracker::new(
                settings.cpu_warning_celsius,
                settings.cpu_critical_celsius,
                settings.warning_streak,
            ),
            disk: DiskTracker::new(settings.disk_warning_percent, settings.disk_critical_percent),
            logging_running: None,
        };

        Self {
            inner: Arc::new(Inner {
                driver,
                probe,
                metrics,
                dispatcher,
                scheduler,
                settings,
                state: parking_lot::Mutex::new(state),
                snapshot: parking_lot::RwLock::new(HealthSnapshot::default()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.snapshot.read().clone()
    }

    pub async fn check_internet(&self) -> bool {
        self.inner.check_internet().await
    }

    pub async fn check_hardware(&self) -> bool {
        self.inner.check_hardware().await
    }

    pub async fn check_cpu_temperature(&self) -> Option<f64> {
        self.inner.check_cpu_temperature().await
    }

    pub async fn check_disk_space(&self) -> Option<DiskUsage> {
        self.inner.check_disk_space().await
    }

    pub fn check_logging_status(&self) -> bool {
        self.inner.check_logging_status()
    }

    /// Starts the check loop and the alert delivery worker. Returns false if
    /// already running.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return false;
        }

        self.inner.dispatcher.start_worker().await;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.inner.clone(), stop_rx));
        *task = Some(RunningLoop { stop_tx, handle });
        tracing::info!("Health monitor started");
        true
    }

    pub async fn stop(&self) -> bool {
        let Some(running) = self.task.lock().await.take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Health monitor loop ended abnormally");
        }
        self.inner.dispatcher.stop_worker().await;
        tracing::info!("Health monitor stopped");
        true
    }
}

struct Cadence {
    every: Duration,
    next: Instant,
}

impl Cadence {
    fn new(secs: u64, now: Instant) -> Self {
        Self {
            every: Duration::from_secs(secs.max(1)),
            next: now,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.every;
        true
    }
}

async fn run_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    let now = Instant::now();
    let settings = &inner.settings;
    let mut internet = Cadence::new(settings.internet_check_secs, now);
    let mut hardware = Cadence::new(settings.hardware_check_secs, now);
    let mut cpu = Cadence::new(settings.cpu_check_secs, now);
    let mut disk = Cadence::new(settings.disk_check_secs, now);
    let mut logging = Cadence::new(settings.logging_check_secs, now);

    let mut ticker = tokio::time::interval(settings.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        let now = Instant::now();
        let pass = async {
            if internet.due(now) {
                inner.check_internet().await;
            }
            if hardware.due(now) {
                inner.check_hardware().await;
            }
            if cpu.due(now) {
                inner.check_cpu_temperature().await;
            }
            if disk.due(now) {
                inner.check_disk_space().await;
            }
            if logging.due(now) {
                inner.check_logging_status();
            }
        };
        if AssertUnwindSafe(pass).catch_unwind().await.is_err() {
            tracing::error!("Health check panicked");
        }
    }
    tracing::debug!("Health monitor loop exited");
}

impl Inner {
    async fn check_internet(&self) -> bool {
        let reachable = self.probe.is_reachable().await;
        let now = Local::now();
        let (transition, failures) = {
            let mut state = self.state.lock();
            let transition = state.internet.observe(reachable, now);
            self.snapshot.write().internet = state.internet.clone();
            (transition, state.internet.consecutive_failures)
        };
        self.touch_snapshot();

        match transition {
            Some(Transition::Disconnected) => {
                tracing::warn!(failures, "Internet connection lost");
                self.dispatcher.set_online(false);
                self.dispatcher.raise(
                    AlertLevel::Warning,
                    "Internet Connection Lost",
                    "Internet connectivity has been lost. Alerts will be queued until the connection is restored.",
                    alert_data([
                        ("disconnect_time", now.format("%Y-%m-%d %H:%M:%S").to_string()),
                        ("failure_count", failures.to_string()),
                    ]),
                );
            }
            Some(Transition::Connected) => {
                let drained = self.dispatcher.set_online(true);
                tracing::info!(queued = drained, "Internet connection restored");
                self.dispatcher.raise(
                    AlertLevel::Info,
                    "Internet Connection Restored",
                    "Internet connectivity has been restored. Sending queued alerts.",
                    alert_data([
                        ("reconnect_time", now.format("%Y-%m-%d %H:%M:%S").to_string()),
                        ("queued_alerts", drained.to_string()),
                    ]),
                );
            }
            None if !reachable => tracing::debug!(failures, "Internet still unreachable"),
            None => {}
        }
        reachable
    }

    async fn check_hardware(&self) -> bool {
        let connected = self.driver.is_connected().await;
        let now = Local::now();
        let (transition, failures) = {
            let mut state = self.state.lock();
            let transition = state.hardware.observe(connected, now);
            self.snapshot.write().hardware = state.hardware.clone();
            (transition, state.hardware.consecutive_failures)
        };
        self.touch_snapshot();

        match transition {
            Some(Transition::Disconnected) => {
                tracing::error!(failures, "Thermocouple board disconnected");
                self.dispatcher.raise(
                    AlertLevel::Critical,
                    "SMTC Board Disconnected",
                    "The thermocouple measurement board has been disconnected. Temperature logging will stop.",
                    alert_data([
                        ("disconnect_time", now.format("%Y-%m-%d %H:%M:%S").to_string()),
                        ("failure_count", failures.to_string()),
                    ]),
                );
            }
            Some(Transition::Connected) => {
                tracing::info!("Thermocouple board reconnected");
                self.dispatcher.raise(
                    AlertLevel::Info,
                    "SMTC Board Reconnected",
                    "The thermocouple measurement board has been reconnected. Temperature logging can resume.",
                    alert_data([("reconnect_time", now.format("%Y-%m-%d %H:%M:%S").to_string())]),
                );
            }
            None => {}
        }
        connected
    }

    /// `None` when the temperature cannot be read; the check is skipped.
    async fn check_cpu_temperature(&self) -> Option<f64> {
        let metrics = self.metrics.clone();
        let celsius = match tokio::task::spawn_blocking(move || metrics.cpu_temperature()).await {
            Ok(Ok(celsius)) if celsius > 0.0 => celsius,
            Ok(Ok(celsius)) => {
                tracing::debug!(celsius, "Ignoring implausible CPU temperature");
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %format!("{:#}", e), "CPU temperature unavailable");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "CPU temperature check failed");
                return None;
            }
        };

        let (crossed, streak) = {
            let mut state = self.state.lock();
            let crossed = state.cpu.observe(celsius);
            (crossed, state.cpu.consecutive_high())
        };
        self.snapshot.write().cpu_temperature = Some(celsius);
        self.touch_snapshot();

        match crossed {
            Some(ThresholdLevel::Critical) => {
                self.dispatcher.raise(
                    AlertLevel::Critical,
                    "Critical CPU Temperature",
                    &format!(
                        "Board CPU temperature is critically high at {:.1}°C. Immediate action required to prevent damage.",
                        celsius
                    ),
                    alert_data([
                        ("current_temperature", format!("{:.1}°C", celsius)),
                        ("critical_threshold", format!("{}°C", self.settings.cpu_critical_celsius)),
                    ]),
                );
            }
            Some(ThresholdLevel::Warning) => {
                self.dispatcher.raise(
                    AlertLevel::Warning,
                    "High CPU Temperature",
                    &format!("Board CPU temperature is elevated at {:.1}°C. Monitor closely.", celsius),
                    alert_data([
                        ("current_temperature", format!("{:.1}°C", celsius)),
                        ("warning_threshold", format!("{}°C", self.settings.cpu_warning_celsius)),
                        ("consecutive_warnings", streak.to_string()),
                    ]),
                );
            }
            _ => {}
        }
        Some(celsius)
    }

    async fn check_disk_space(&self) -> Option<DiskUsage> {
        let metrics = self.metrics.clone();
        let usage = match tokio::task::spawn_blocking(move || metrics.disk_usage()).await {
            Ok(Ok(usage)) => usage,
            Ok(Err(e)) => {
                tracing::warn!(error = %format!("{:#}", e), "Disk usage unavailable");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Disk usage check failed");
                return None;
            }
        };

        let percent = usage.usage_percent();
        let crossed = self.state.lock().disk.observe(percent);
        self.snapshot.write().disk = Some(usage);
        self.touch_snapshot();

        let free_gib = format!("{:.1} GB", usage.available_bytes as f64 / GIB);
        match crossed {
            Some(ThresholdLevel::Critical) => {
                self.dispatcher.raise(
                    AlertLevel::Critical,
                    "Critical Disk Space",
                    &format!("Disk usage is critically high at {:.1}%. System may become unstable.", percent),
                    alert_data([
                        ("disk_usage", format!("{:.1}%", percent)),
                        ("free_space", free_gib),
                        ("total_space", format!("{:.1} GB", usage.total_bytes as f64 / GIB)),
                    ]),
                );
            }
            Some(ThresholdLevel::Warning) => {
                self.dispatcher.raise(
                    AlertLevel::Warning,
                    "Low Disk Space",
                    &format!("Disk usage is high at {:.1}%. Consider cleaning up old files.", percent),
                    alert_data([("disk_usage", format!("{:.1}%", percent)), ("free_space", free_gib)]),
                );
            }
            _ => {}
        }
        Some(usage)
    }

    /// Alerts when the scheduler goes from running to stopped.
    fn check_logging_status(&self) -> bool {
        let running = self.scheduler.is_running();
        let previous = self.state.lock().logging_running.replace(running);
        self.snapshot.write().logging_running = running;
        self.touch_snapshot();

        if previous == Some(true) && !running {
            let now = Local::now();
            self.dispatcher.raise(
                AlertLevel::Warning,
                "Temperature Logging Stopped",
                "Temperature data logging has stopped. No new data will be collected until logging is restarted.",
                alert_data([
                    ("stop_time", now.format("%Y-%m-%d %H:%M:%S").to_string()),
                    ("action_required", "Check system and restart logging".to_string()),
                ]),
            );
        }
        running
    }

    fn touch_snapshot(&self) {
        self.snapshot.write().updated_at = Some(Local::now());
    }
}
