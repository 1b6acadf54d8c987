// Application layer - Services and the traits they depend on
pub mod alert_dispatcher;
pub mod app_context;
pub mod calibration_service;
pub mod channel_driver;
pub mod health_monitor;
pub mod host_probes;
pub mod notifier;
pub mod persistence_service;
pub mod polling_scheduler;
pub mod structured_store;

#[cfg(test)]
pub mod test_support;
