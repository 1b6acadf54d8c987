// Simulated driver - deterministic stand-in for the thermocouple board
use crate::application::channel_driver::{ChannelDriver, DriverError};
use crate::domain::reading::ChannelId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const BASE_CELSIUS: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Board answers without a value.
    NoValue,
    /// Board I/O fails.
    Io,
}

/// Produces a slow sine wave per channel. Faults can be injected per channel
/// and every read is counted, which the scheduler tests rely on.
pub struct SimulatedDriver {
    channel_count: ChannelId,
    connected: AtomicBool,
    sequence: AtomicU64,
    faults: Mutex<HashMap<ChannelId, Fault>>,
    reads: Mutex<HashMap<ChannelId, usize>>,
}

impl SimulatedDriver {
    /// A board that still needs `connect()`.
    pub fn new(channel_count: ChannelId) -> Self {
        Self {
            channel_count,
            connected: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            faults: Mutex::new(HashMap::new()),
            reads: Mutex::new(HashMap::new()),
        }
    }

    pub fn connected(channel_count: ChannelId) -> Self {
        let driver = Self::new(channel_count);
        driver.connected.store(true, Ordering::SeqCst);
        driver
    }

    pub fn inject_fault(&self, channel: ChannelId, fault: Fault) {
        self.faults.lock().insert(channel, fault);
    }

    pub fn clear_fault(&self, channel: ChannelId) {
        self.faults.lock().remove(&channel);
    }

    /// Simulates the board dropping off the bus (or coming back).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn read_count(&self, channel: ChannelId) -> usize {
        self.reads.lock().get(&channel).copied().unwrap_or(0)
    }

    fn value_for(&self, channel: ChannelId) -> f64 {
        let step = self.sequence.fetch_add(1, Ordering::Relaxed) as f64;
        BASE_CELSIUS + f64::from(channel) * 0.5 + (step * 0.1).sin() * 0.75
    }
}

#[async_trait]
impl ChannelDriver for SimulatedDriver {
    async fn connect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(channels = self.channel_count, "Connected to simulated board");
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from simulated board");
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_channel(&self, channel: ChannelId) -> Result<Option<f64>, DriverError> {
        *self.reads.lock().entry(channel).or_insert(0) += 1;

        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::NotConnected);
        }
        if channel == 0 || channel > self.channel_count {
            return Err(DriverError::Read {
                channel,
                reason: "no such input".to_string(),
            });
        }

        match self.faults.lock().get(&channel).copied() {
            Some(Fault::NoValue) => return Ok(None),
            Some(Fault::Io) => {
                return Err(DriverError::Read {
                    channel,
                    reason: "bus error".to_string(),
                });
            }
            None => {}
        }

        Ok(Some(self.value_for(channel)))
    }

    async fn board_info(&self) -> HashMap<String, String> {
        HashMap::from([
            ("model".to_string(), "simulated".to_string()),
            ("connected".to_string(), self.connected.load(Ordering::SeqCst).to_string()),
            ("channels".to_string(), self.channel_count.to_string()),
            ("sensor_type".to_string(), "K".to_string()),
            ("hw_revision".to_string(), "1.0".to_string()),
        ])
    }
}
