//! Security Gateway Binary
//!
//! Runs the request security pipeline in front of a demo route set, with the
//! operational endpoints for metrics, alerts and the audit trail.

use security_core::{
    config::Config, context::SecurityContext, observability::init_observability, server,
    shutdown::ShutdownCoordinator,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::from_file_with_env(&config_path)?;

    init_observability(&config.logging.level, &config.logging.format);
    info!("Starting Security Gateway");
    info!("Configuration loaded and validated from {}", config_path);

    let context = SecurityContext::from_config(config);

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let tasks = context.start_background_tasks(coordinator.subscribe());

    let signals = coordinator.clone();
    tokio::spawn(async move {
        signals.wait_for_signal().await;
    });

    server::serve(context, coordinator.subscribe()).await?;

    // Covers a server exit that was not caused by a signal
    coordinator.shutdown();
    tasks.join().await;
    info!("Background tasks stopped");

    Ok(())
}
