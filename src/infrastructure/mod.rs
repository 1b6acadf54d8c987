// Infrastructure layer - External dependencies and adapters
pub mod alert_queue_file;
pub mod calibration_file;
pub mod config;
pub mod dual_store;
pub mod influx_store;
pub mod log_notifier;
pub mod simulated_driver;
pub mod sqlite_store;
pub mod store_factory;
pub mod system_metrics;
pub mod tcp_probe;
pub mod text_log;
