// Main entry point - Dependency injection and process lifecycle
use std::sync::Arc;

use thermo_logger::application::app_context::AppContext;
use thermo_logger::infrastructure::config::load_settings;
use thermo_logger::infrastructure::log_notifier::LogNotifier;
use thermo_logger::infrastructure::simulated_driver::SimulatedDriver;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    let driver = Arc::new(SimulatedDriver::new(settings.scheduler.channel_count));
    let context = AppContext::build(settings, driver, Arc::new(LogNotifier))?;

    context.start().await;
    tracing::info!("thermo-logger running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stop requested");
    context.shutdown().await;

    Ok(())
}
