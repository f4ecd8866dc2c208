//! Retraining scheduler
//!
//! Long-lived state machine driving the export -> train -> version pipeline
//! on a fixed interval. One job runs at a time; a tick that arrives while a
//! job is in flight is skipped. The high-water mark (`last_training_time`)
//! and the training counter only advance after the versioning step
//! succeeds, so a failed cycle is retried on the next tick with the same or
//! a wider data window.

use crate::artifacts::ArtifactPair;
use crate::error::RetrainError;
use crate::export::LabeledDataExporter;
use crate::models::{TrainingInfo, TrainingMode, VersionRecord};
use crate::observability::RetrainingMetrics;
use crate::store::LabelStore;
use crate::trainer::Trainer;
use crate::versioning::ModelVersionManager;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::interval_at;
use tracing::{error, info, warn};

/// Configuration for the retraining scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between retraining runs.
    pub interval: Duration,
    /// Directory for transient training snapshots.
    pub snapshot_dir: PathBuf,
    /// Live artifact pair locations read by the prediction path.
    pub live_pair: ArtifactPair,
}

impl SchedulerConfig {
    pub fn new(snapshot_dir: impl Into<PathBuf>, live_pair: ArtifactPair) -> Self {
        Self {
            interval: Duration::from_secs(24 * 3600),
            snapshot_dir: snapshot_dir.into(),
            live_pair,
        }
    }
}

/// Mutable scheduler state, reconstructible from the version store.
#[derive(Debug, Default)]
struct SchedulerState {
    last_training_time: Option<DateTime<Utc>>,
    training_count: u64,
}

/// Snapshot of the scheduler for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub training_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_training_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_time: Option<DateTime<Utc>>,
}

/// Result of one retraining cycle that did not fail.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A new model version was produced and archived.
    Completed(VersionRecord),
    /// No labeled data exists at all; nothing to do yet.
    NoLabeledData,
    /// Incremental export found no rows since the last training. Expected
    /// steady state between trainings.
    NoNewData,
}

/// Drives periodic retraining with injected collaborators.
pub struct RetrainingScheduler {
    exporter: LabeledDataExporter,
    trainer: Arc<dyn Trainer>,
    versions: Arc<ModelVersionManager>,
    config: SchedulerConfig,
    state: RwLock<SchedulerState>,
    enabled: AtomicBool,
    job_running: AtomicBool,
    next_run_time: RwLock<Option<DateTime<Utc>>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    metrics: RetrainingMetrics,
}

impl RetrainingScheduler {
    /// Build the scheduler, reconstructing `last_training_time` and
    /// `training_count` from the latest version record when one exists.
    /// Best-effort recovery: in-flight partial runs are not recoverable.
    pub fn new(
        store: Arc<dyn LabelStore>,
        trainer: Arc<dyn Trainer>,
        versions: Arc<ModelVersionManager>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        fs::create_dir_all(&config.snapshot_dir)?;

        let mut state = SchedulerState::default();
        if let Some(latest) = versions.get_latest_version()? {
            state.last_training_time = Some(latest.timestamp);
            state.training_count = versions.list_versions()?.len() as u64;
            info!(
                last_training_time = %latest.timestamp,
                training_count = state.training_count,
                "Restored scheduler state from version metadata"
            );
        }

        let metrics = RetrainingMetrics::new();
        if let Some(t) = state.last_training_time {
            metrics.set_last_training_timestamp(t.timestamp());
        }
        metrics.set_versions_retained(state.training_count as i64);

        Ok(Self {
            exporter: LabeledDataExporter::new(store),
            trainer,
            versions,
            config,
            state: RwLock::new(state),
            enabled: AtomicBool::new(false),
            job_running: AtomicBool::new(false),
            next_run_time: RwLock::new(None),
            shutdown_tx: Mutex::new(None),
            metrics,
        })
    }

    /// Arm the timer. Invoked during service bootstrap; calling it again
    /// while armed is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let (tx, rx) = broadcast::channel(1);
        *self.shutdown_tx.lock().await = Some(tx);

        let this = self.clone();
        tokio::spawn(this.run(rx));

        info!(
            interval_secs = self.config.interval.as_secs(),
            "Retraining scheduler started"
        );
    }

    /// Cancel the timer. An in-flight job finishes; no further ticks fire.
    pub async fn stop(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        *self.next_run_time.write().await = None;
        info!("Retraining scheduler stopped");
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.interval;
        // First run happens one interval after start, not immediately
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        self.set_next_run(Some(next_run_after(period))).await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.set_next_run(Some(next_run_after(period))).await;
                    self.execute_job().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retraining scheduler");
                    break;
                }
            }
        }

        self.set_next_run(None).await;
    }

    async fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        *self.next_run_time.write().await = at;
    }

    /// Run one job with the single-flight guard. A trigger that arrives
    /// while a job is in flight is skipped, not queued.
    pub async fn execute_job(&self) {
        if self.job_running.swap(true, Ordering::SeqCst) {
            warn!("Previous retraining job still in flight, skipping this tick");
            return;
        }

        let started = Instant::now();
        match self.run_cycle().await {
            Ok(CycleOutcome::Completed(record)) => {
                self.metrics.inc_cycles_completed();
                self.metrics
                    .observe_training_duration(started.elapsed().as_secs_f64());
                info!(
                    version_id = %record.version_id,
                    samples = record.training_info.total_samples,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scheduled retraining completed"
                );
            }
            Ok(CycleOutcome::NoLabeledData) => {
                self.metrics.inc_cycles_skipped();
                info!("No labeled data in store, skipping retraining");
            }
            Ok(CycleOutcome::NoNewData) => {
                self.metrics.inc_cycles_skipped();
                info!("No new labeled data since last training, skipping retraining");
            }
            Err(e) => {
                self.metrics.inc_cycles_failed();
                error!(error = %e, "Scheduled retraining failed");
            }
        }

        self.job_running.store(false, Ordering::SeqCst);
    }

    /// One retraining cycle: stats, export, train, version, commit.
    ///
    /// State is only mutated after versioning succeeds; every error leaves
    /// `last_training_time` and `training_count` untouched.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, RetrainError> {
        let cycle_start = Utc::now();

        let stats = self.exporter.labeled_stats().await?;
        self.metrics.set_labeled_samples(stats.total_labels as i64);
        if stats.total_labels == 0 {
            return Ok(CycleOutcome::NoLabeledData);
        }

        let since = self.state.read().await.last_training_time;
        let snapshot_path = self.config.snapshot_dir.join(format!(
            "training_data_{}.json",
            cycle_start.format("%Y%m%d_%H%M%S_%f")
        ));

        let export_stats = match since {
            None => {
                info!("First training: exporting all labeled data");
                self.exporter.export(&snapshot_path, None, true).await?
            }
            Some(t) => {
                info!(since = %t, "Exporting new labeled data since last training");
                self.exporter.export(&snapshot_path, Some(t), false).await?
            }
        };

        if export_stats.total_records == 0 {
            return Ok(CycleOutcome::NoNewData);
        }

        // Continue from the live pair when one exists, otherwise build fresh
        let load_existing = self.config.live_pair.exists();
        let results = self.trainer.train(&snapshot_path, load_existing).await?;

        let training_info = TrainingInfo {
            total_samples: export_stats.total_records,
            churned: export_stats.churned,
            not_churned: export_stats.not_churned,
            training_mode: if since.is_none() {
                TrainingMode::Initial
            } else {
                TrainingMode::Incremental
            },
            new_samples_only: since.is_some(),
            // Settings come from the trainer's own report so metadata
            // cannot drift from what actually ran
            epochs: results.epochs,
            batch_size: results.batch_size,
        };

        let record = self
            .versions
            .save_new_version(
                &results.model_path,
                &results.scaler_path,
                &results.final_metrics,
                &training_info,
            )
            .map_err(RetrainError::Versioning)?;

        // Commit the high-water mark only now that every prior step
        // succeeded. Advancing to the cycle start time keeps rows labeled
        // during the cycle inside the next window.
        let training_count = {
            let mut state = self.state.write().await;
            state.last_training_time = Some(cycle_start);
            state.training_count += 1;
            state.training_count
        };
        self.metrics.set_last_training_timestamp(cycle_start.timestamp());
        if let Ok(versions) = self.versions.list_versions() {
            self.metrics.set_versions_retained(versions.len() as i64);
        }

        // Best-effort cleanup of the transient snapshot
        if let Err(e) = fs::remove_file(&snapshot_path) {
            warn!(
                path = %snapshot_path.display(),
                error = %e,
                "Failed to clean up training snapshot"
            );
        }

        info!(
            version_id = %record.version_id,
            total_trainings = training_count,
            next_window_start = %cycle_start,
            "Retraining cycle committed"
        );

        Ok(CycleOutcome::Completed(record))
    }

    /// Current scheduler status for the operator surface.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.read().await;
        SchedulerStatus {
            enabled: self.enabled.load(Ordering::SeqCst),
            running: self.timer_running().await,
            training_count: state.training_count,
            last_training_time: state.last_training_time,
            next_run_time: *self.next_run_time.read().await,
        }
    }

    /// Healthy iff the scheduler is enabled and its timer task is alive.
    pub async fn healthy(&self) -> bool {
        let status = self.status().await;
        status.enabled && status.running
    }

    pub fn version_manager(&self) -> &ModelVersionManager {
        &self.versions
    }

    async fn timer_running(&self) -> bool {
        self.shutdown_tx
            .lock()
            .await
            .as_ref()
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }
}

fn next_run_after(period: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero())
}
