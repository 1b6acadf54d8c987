// Alert dispatcher - deduplicates alerts, queues them for delivery and holds them on disk while offline
use crate::application::notifier::Notifier;
use crate::domain::alert::{Alert, AlertLevel};
use crate::infrastructure::alert_queue_file::DurableAlertQueue;
use crate::infrastructure::config::AlertSettings;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// In the in-memory delivery queue.
    Queued,
    /// Written to the durable queue because the network is down.
    Persisted,
    /// Same title raised within the suppression window.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub pending: usize,
    pub persisted: usize,
    pub delivered: usize,
    pub online: bool,
}

struct Inner {
    notifier: Arc<dyn Notifier>,
    durable: DurableAlertQueue,
    settings: AlertSettings,
    last_raised: parking_lot::Mutex<HashMap<String, DateTime<Local>>>,
    online: AtomicBool,
    // held while deciding between memory and disk, and while draining
    routing: parking_lot::Mutex<()>,
    tx: mpsc::UnboundedSender<Alert>,
    pending: AtomicUsize,
    delivered: AtomicUsize,
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<mpsc::UnboundedReceiver<Alert>>,
}

pub struct AlertDispatcher {
    inner: Arc<Inner>,
    // receiver is parked here while no worker is running
    rx: Mutex<Option<mpsc::UnboundedReceiver<Alert>>>,
    worker: Mutex<Option<Worker>>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, durable: DurableAlertQueue, settings: AlertSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                notifier,
                durable,
                settings,
                last_raised: parking_lot::Mutex::new(HashMap::new()),
                online: AtomicBool::new(true),
                routing: parking_lot::Mutex::new(()),
                tx,
                pending: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            }),
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    pub fn raise(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
        data: BTreeMap<String, String>,
    ) -> RaiseOutcome {
        self.raise_at(Local::now(), level, title, message, data)
    }

    /// Raises an alert as of `now`. At most one alert per title is accepted
    /// within the suppression window.
    pub fn raise_at(
        &self,
        now: DateTime<Local>,
        level: AlertLevel,
        title: &str,
        message: &str,
        data: BTreeMap<String, String>,
    ) -> RaiseOutcome {
        {
            let window = self.inner.settings.suppression_window();
            let mut last_raised = self.inner.last_raised.lock();
            if let Some(previous) = last_raised.get(title) {
                if now - *previous < window {
                    tracing::debug!(title, "Alert suppressed as duplicate");
                    return RaiseOutcome::Suppressed;
                }
            }
            last_raised.retain(|_, raised| now - *raised < window);
            last_raised.insert(title.to_string(), now);
        }

        let alert = Alert::new(level, title, message, data, now);
        tracing::info!(severity = %alert.level, title, "Alert raised");

        let _routing = self.inner.routing.lock();
        if self.inner.online.load(Ordering::SeqCst) {
            self.inner.enqueue(alert);
            return RaiseOutcome::Queued;
        }
        match self.inner.durable.append(&alert) {
            Ok(()) => RaiseOutcome::Persisted,
            Err(e) => {
                tracing::error!(title, error = %format!("{:#}", e), "Failed to persist alert, keeping it in memory");
                self.inner.enqueue(alert);
                RaiseOutcome::Queued
            }
        }
    }

    /// Records network state. Coming back online drains the durable queue
    /// into the delivery queue in raise order; returns how many were drained.
    pub fn set_online(&self, online: bool) -> usize {
        let _routing = self.inner.routing.lock();
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            self.inner.drain_durable()
        } else {
            if !online && was_online {
                tracing::warn!("Network down, alerts go to the durable queue");
            }
            0
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            pending: self.inner.pending.load(Ordering::SeqCst),
            persisted: self.inner.durable.len(),
            delivered: self.inner.delivered.load(Ordering::SeqCst),
            online: self.is_online(),
        }
    }

    /// Starts the delivery worker. Alerts left on disk by a previous run are
    /// picked up if the network is up. Returns false if already running.
    pub async fn start_worker(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }
        let Some(rx) = self.rx.lock().await.take() else {
            tracing::error!("Alert receiver missing, worker not started");
            return false;
        };

        {
            let _routing = self.inner.routing.lock();
            if self.is_online() {
                self.inner.drain_durable();
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(deliver_loop(self.inner.clone(), rx, stop_rx));
        *worker = Some(Worker { stop_tx, handle });
        tracing::info!("Alert delivery worker started");
        true
    }

    pub async fn stop_worker(&self) -> bool {
        let Some(worker) = self.worker.lock().await.take() else {
            return false;
        };
        let _ = worker.stop_tx.send(true);
        match worker.handle.await {
            Ok(rx) => *self.rx.lock().await = Some(rx),
            Err(e) => tracing::error!(error = %e, "Alert worker ended abnormally"),
        }
        tracing::info!("Alert delivery worker stopped");
        true
    }
}

impl Inner {
    fn enqueue(&self, alert: Alert) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(alert).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Alert queue closed, alert dropped");
        }
    }

    /// Callers hold `routing`.
    fn drain_durable(&self) -> usize {
        match self.durable.drain() {
            Ok(alerts) => {
                let count = alerts.len();
                for alert in alerts {
                    self.enqueue(alert);
                }
                if count > 0 {
                    tracing::info!(count, "Re-queued alerts held while offline");
                }
                count
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "Failed to drain durable alert queue");
                0
            }
        }
    }

    /// Puts a failed alert back: on disk while offline, else in memory.
    fn requeue(&self, alert: Alert) {
        let _routing = self.routing.lock();
        if !self.online.load(Ordering::SeqCst) {
            match self.durable.append(&alert) {
                Ok(()) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    tracing::error!(title = %alert.title, error = %format!("{:#}", e), "Failed to persist alert for retry");
                }
            }
        }
        if self.tx.send(alert).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn deliver(self: &Arc<Self>, mut alert: Alert) {
        match self.notifier.deliver(&alert).await {
            Ok(()) => {
                alert.sent = true;
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.delivered.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(title = %alert.title, "Alert delivered");
            }
            Err(e) => {
                alert.retry_count += 1;
                if !self.notifier.should_retry(&alert) {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::error!(
                        title = %alert.title,
                        retries = alert.retry_count,
                        error = %format!("{:#}", e),
                        "Alert dropped after failed deliveries"
                    );
                    return;
                }

                tracing::warn!(title = %alert.title, retry = alert.retry_count, error = %format!("{:#}", e), "Alert delivery failed, retrying");
                let inner = self.clone();
                let delay = self.settings.retry_delay();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.requeue(alert);
                });
            }
        }
    }
}

async fn deliver_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<Alert>,
    mut stop_rx: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Alert> {
    loop {
        tokio::select! {
            alert = rx.recv() => match alert {
                Some(alert) => inner.deliver(alert).await,
                None => break,
            },
            _ = stop_rx.changed() => break,
        }
    }
    rx
}
