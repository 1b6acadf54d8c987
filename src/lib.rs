// Thermocouple data logger - sampling, calibration, persistence and health monitoring
pub mod application;
pub mod domain;
pub mod infrastructure;
