// Channel driver trait - the contract a thermocouple board driver must satisfy
use crate::domain::reading::ChannelId;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("channel {channel} read failed: {reason}")]
    Read { channel: ChannelId, reason: String },

    #[error("board not connected")]
    NotConnected,
}

#[async_trait]
pub trait ChannelDriver: Send + Sync {
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    /// Raw, uncalibrated temperature for one channel.
    ///
    /// `Ok(None)` means the board answered without a value (open thermocouple,
    /// channel fault); `Err` is an I/O failure talking to the board.
    async fn read_channel(&self, channel: ChannelId) -> Result<Option<f64>, DriverError>;

    async fn board_info(&self) -> HashMap<String, String>;
}
