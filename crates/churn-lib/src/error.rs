//! Error taxonomy for the retraining pipeline
//!
//! Every retraining-cycle failure is contained inside the scheduler's job
//! execution; these types exist so the scheduler can tell failure classes
//! apart when logging and deciding whether to advance its high-water mark.

use thiserror::Error;

/// Errors raised by the labeled-data exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A full (non-incremental) export found no labeled data at all.
    /// Retraining cannot proceed without any historical data.
    #[error("no labeled customer data found in the store")]
    NoLabeledData,

    #[error("failed to query labeled data: {0}")]
    Query(#[source] anyhow::Error),

    #[error("failed to materialize training snapshot: {0}")]
    Write(#[source] anyhow::Error),
}

/// Errors raised by a trainer implementation.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// The snapshot lacks the expected label column. Distinguishable so
    /// callers can tell a malformed export from a training failure.
    #[error("snapshot is missing the target column '{0}'")]
    MissingTargetColumn(String),

    #[error("snapshot contains no training rows")]
    EmptySnapshot,

    #[error("snapshot row {row} has {got} values, expected {expected}")]
    MalformedRow {
        row: usize,
        got: usize,
        expected: usize,
    },

    /// The existing model was trained on a different feature set and
    /// cannot be continued from.
    #[error("existing model features do not match snapshot: model has {model}, snapshot has {snapshot}")]
    FeatureMismatch { model: usize, snapshot: usize },

    #[error("failed to read or write training artifacts: {0}")]
    Io(#[source] anyhow::Error),
}

/// Errors raised by model artifact persistence.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Scaler and model must always be swapped as a pair; a pair whose
    /// feature sets disagree is refused.
    #[error("artifact pair mismatch: model has {model} features, scaler has {scaler}")]
    FeatureMismatch { model: usize, scaler: usize },

    #[error("artifact not found at {path}")]
    NotFound { path: String },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Failure of one retraining cycle, classified by the step that failed.
///
/// None of these advance `last_training_time` or `training_count`; the next
/// scheduled tick retries with the same (or wider) data window.
#[derive(Debug, Error)]
pub enum RetrainError {
    /// Step 2: full export found no data (see [`ExportError::NoLabeledData`]).
    #[error("no labeled data available for a full export")]
    DataUnavailable,

    #[error("training data export failed: {0}")]
    Export(#[source] ExportError),

    #[error("trainer failed: {0}")]
    Trainer(#[source] TrainerError),

    /// Artifact copy or metadata write failed after a successful training
    /// run. The cycle is treated as failed even though a new model exists
    /// transiently; re-training on overlapping data is safe.
    #[error("model versioning failed: {0}")]
    Versioning(#[source] anyhow::Error),
}

impl From<ExportError> for RetrainError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::NoLabeledData => RetrainError::DataUnavailable,
            other => RetrainError::Export(other),
        }
    }
}

impl From<TrainerError> for RetrainError {
    fn from(err: TrainerError) -> Self {
        RetrainError::Trainer(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_labeled_data_maps_to_data_unavailable() {
        let err: RetrainError = ExportError::NoLabeledData.into();
        assert!(matches!(err, RetrainError::DataUnavailable));
    }

    #[test]
    fn test_query_error_maps_to_export() {
        let err: RetrainError = ExportError::Query(anyhow::anyhow!("connection reset")).into();
        assert!(matches!(err, RetrainError::Export(_)));
    }

    #[test]
    fn test_missing_target_column_message() {
        let err = TrainerError::MissingTargetColumn("target".to_string());
        assert!(err.to_string().contains("target"));
    }
}
