// Domain layer - Readings, calibration, alerts and health state
pub mod alert;
pub mod calibration;
pub mod channel;
pub mod health;
pub mod reading;
