//! Churn Prediction Service - retraining backend
//!
//! Hosts the background retraining scheduler and the operator HTTP surface
//! (scheduler status, health, archived model versions, Prometheus metrics).

use anyhow::Result;
use churn_lib::{
    default_feature_columns, ArtifactPair, LogisticTrainer, MemoryLabelStore,
    ModelVersionManager, RetrainingScheduler, SchedulerConfig, TrainingOptions,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting churn-server");

    // Load configuration
    let config = config::ServerConfig::load()?;
    info!(
        models_dir = %config.models_dir,
        interval_hours = config.retraining_interval_hours,
        max_versions = config.max_versions,
        "Service configured"
    );

    let models_dir = Path::new(&config.models_dir);
    std::fs::create_dir_all(models_dir)?;
    let live_pair = ArtifactPair::in_dir(models_dir);

    let store = Arc::new(MemoryLabelStore::new(default_feature_columns()));

    let trainer = Arc::new(LogisticTrainer::new(
        live_pair.clone(),
        TrainingOptions {
            validation_split: config.validation_split,
            epochs: config.epochs,
            batch_size: config.batch_size,
            ..TrainingOptions::default()
        },
    ));

    let versions = Arc::new(ModelVersionManager::new(models_dir, config.max_versions)?);

    let mut scheduler_config = SchedulerConfig::new(&config.data_dir, live_pair);
    scheduler_config.interval = Duration::from_secs(config.retraining_interval_hours * 3600);

    let scheduler = Arc::new(RetrainingScheduler::new(
        store.clone(),
        trainer,
        versions,
        scheduler_config,
    )?);

    // Arm the timer at bootstrap, not on first request
    if config.enable_scheduler {
        scheduler.start().await;
    } else {
        info!("Retraining scheduler disabled by configuration");
    }

    let app_state = Arc::new(api::AppState::new(scheduler.clone(), store));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.stop().await;
    api_handle.abort();

    Ok(())
}
