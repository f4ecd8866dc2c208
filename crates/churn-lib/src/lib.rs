//! Core library for the churn prediction retraining service
//!
//! This crate provides the core functionality for:
//! - Exporting labeled customer data into training snapshots
//! - Incremental model retraining via a pluggable trainer
//! - Model artifact versioning with retention and pruning
//! - The background retraining scheduler
//! - Status reporting and observability

pub mod artifacts;
pub mod error;
pub mod export;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod store;
pub mod trainer;
pub mod versioning;

pub use artifacts::{ArtifactPair, ModelArtifact, ScalerArtifact};
pub use error::{ArtifactError, ExportError, RetrainError, TrainerError};
pub use export::LabeledDataExporter;
pub use models::*;
pub use observability::RetrainingMetrics;
pub use scheduler::{CycleOutcome, RetrainingScheduler, SchedulerConfig, SchedulerStatus};
pub use store::{LabelStore, MemoryLabelStore};
pub use trainer::{LogisticTrainer, Trainer, TrainingOptions, TrainingResults};
pub use versioning::ModelVersionManager;
