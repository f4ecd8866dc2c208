//! Model training
//!
//! The scheduler consumes training as an opaque capability behind the
//! [`Trainer`] trait. The built-in [`LogisticTrainer`] fits a logistic
//! decision function with mini-batch gradient descent, continuing from the
//! live artifact pair when asked, and always rewrites model and scaler
//! together.

use crate::artifacts::{sigmoid, ArtifactPair, ModelArtifact, ScalerArtifact};
use crate::error::TrainerError;
use crate::models::{TrainingSnapshot, ID_COLUMN, TARGET_COLUMN};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed seed so training runs are reproducible across retries.
const SHUFFLE_SEED: u64 = 42;

/// Settings for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub target_column: String,
    /// Fraction of rows held out for validation metrics. Zero disables the
    /// split; metrics are then reported without the `val_` prefix.
    pub validation_split: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            target_column: TARGET_COLUMN.to_string(),
            validation_split: 0.2,
            epochs: 100,
            batch_size: 64,
            learning_rate: 0.05,
        }
    }
}

/// Output of a training run: where the updated artifact pair lives, the
/// final metrics, and the settings the run actually used. Settings are
/// reported here so version metadata records what ran, not what a caller
/// assumed.
#[derive(Debug, Clone)]
pub struct TrainingResults {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub final_metrics: BTreeMap<String, f64>,
    pub epochs: usize,
    pub batch_size: usize,
}

/// Opaque training capability consumed by the retraining scheduler.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Train on the snapshot at `snapshot_path`, continuing from the
    /// existing model when `load_existing` is true, and persist the updated
    /// artifact pair.
    async fn train(
        &self,
        snapshot_path: &Path,
        load_existing: bool,
    ) -> Result<TrainingResults, TrainerError>;
}

/// Built-in logistic regression trainer writing to a fixed live pair.
pub struct LogisticTrainer {
    live: ArtifactPair,
    options: TrainingOptions,
}

impl LogisticTrainer {
    pub fn new(live: ArtifactPair, options: TrainingOptions) -> Self {
        Self { live, options }
    }

    pub fn live_pair(&self) -> &ArtifactPair {
        &self.live
    }

    fn prepare(
        &self,
        snapshot: &TrainingSnapshot,
    ) -> Result<(Vec<String>, Vec<Vec<f64>>, Vec<f64>), TrainerError> {
        let target_idx = snapshot
            .column_index(&self.options.target_column)
            .ok_or_else(|| TrainerError::MissingTargetColumn(self.options.target_column.clone()))?;
        let id_idx = snapshot.column_index(ID_COLUMN);

        if snapshot.rows.is_empty() {
            return Err(TrainerError::EmptySnapshot);
        }

        let width = snapshot.columns.len();
        let feature_columns: Vec<String> = snapshot
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx && Some(*i) != id_idx)
            .map(|(_, c)| c.clone())
            .collect();

        let mut features = Vec::with_capacity(snapshot.rows.len());
        let mut targets = Vec::with_capacity(snapshot.rows.len());
        for (row_idx, row) in snapshot.rows.iter().enumerate() {
            if row.len() != width {
                return Err(TrainerError::MalformedRow {
                    row: row_idx,
                    got: row.len(),
                    expected: width,
                });
            }
            let values: Vec<f64> = row
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != target_idx && Some(*i) != id_idx)
                .map(|(_, v)| *v)
                .collect();
            features.push(values);
            targets.push(if row[target_idx] >= 0.5 { 1.0 } else { 0.0 });
        }

        Ok((feature_columns, features, targets))
    }

    fn fit(
        &self,
        model: &mut ModelArtifact,
        features: &[Vec<f64>],
        targets: &[f64],
    ) {
        let n = features.len();
        let dim = model.weights.len();
        let batch_size = self.options.batch_size.max(1);

        for _ in 0..self.options.epochs {
            let mut start = 0;
            while start < n {
                let end = (start + batch_size).min(n);
                let batch = end - start;

                let mut grad_w = vec![0.0; dim];
                let mut grad_b = 0.0;
                for i in start..end {
                    let p = model.predict_proba(&features[i]);
                    let err = p - targets[i];
                    for (g, x) in grad_w.iter_mut().zip(&features[i]) {
                        *g += err * x;
                    }
                    grad_b += err;
                }

                let scale = self.options.learning_rate / batch as f64;
                for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                    *w -= scale * g;
                }
                model.bias -= scale * grad_b;

                start = end;
            }
        }
    }
}

#[async_trait]
impl Trainer for LogisticTrainer {
    async fn train(
        &self,
        snapshot_path: &Path,
        load_existing: bool,
    ) -> Result<TrainingResults, TrainerError> {
        let snapshot = TrainingSnapshot::load(snapshot_path).map_err(TrainerError::Io)?;
        let (feature_columns, mut features, mut targets) = self.prepare(&snapshot)?;

        // Deterministic shuffle before splitting off the validation tail
        shuffle(&mut features, &mut targets, SHUFFLE_SEED);

        let n = features.len();
        let n_val = ((n as f64) * self.options.validation_split).round() as usize;
        let n_val = if n_val >= n { 0 } else { n_val };
        let n_train = n - n_val;

        let scaler = ScalerArtifact::fit(feature_columns.clone(), &features[..n_train]);
        for row in features.iter_mut() {
            scaler.transform(row);
        }

        let mut model = if load_existing {
            let (existing, _) = self
                .live
                .load_checked()
                .map_err(|e| TrainerError::Io(anyhow::Error::new(e)))?;
            if existing.feature_columns != feature_columns {
                return Err(TrainerError::FeatureMismatch {
                    model: existing.feature_columns.len(),
                    snapshot: feature_columns.len(),
                });
            }
            existing
        } else {
            ModelArtifact::zeroed(feature_columns)
        };

        debug!(
            samples = n_train,
            validation = n_val,
            epochs = self.options.epochs,
            load_existing,
            "Starting training run"
        );

        self.fit(&mut model, &features[..n_train], &targets[..n_train]);

        let (eval_x, eval_y, prefix) = if n_val > 0 {
            (&features[n_train..], &targets[n_train..], "val_")
        } else {
            (&features[..n_train], &targets[..n_train], "")
        };
        let final_metrics = evaluate(&model, eval_x, eval_y, prefix);

        // Scaler and model are always rewritten together; each write is
        // atomic so concurrent readers never see a torn artifact.
        scaler
            .save_atomic(&self.live.scaler_path)
            .map_err(TrainerError::Io)?;
        model
            .save_atomic(&self.live.model_path)
            .map_err(TrainerError::Io)?;

        info!(
            model_path = %self.live.model_path.display(),
            scaler_path = %self.live.scaler_path.display(),
            "Training run complete"
        );

        Ok(TrainingResults {
            model_path: self.live.model_path.clone(),
            scaler_path: self.live.scaler_path.clone(),
            final_metrics,
            epochs: self.options.epochs,
            batch_size: self.options.batch_size,
        })
    }
}

/// Classification metrics at a 0.5 threshold plus logistic loss and AUC.
fn evaluate(
    model: &ModelArtifact,
    features: &[Vec<f64>],
    targets: &[f64],
    prefix: &str,
) -> BTreeMap<String, f64> {
    let mut scores = Vec::with_capacity(features.len());
    let (mut tp, mut fp, mut tn, mut fneg) = (0usize, 0usize, 0usize, 0usize);
    let mut loss = 0.0;

    for (row, y) in features.iter().zip(targets) {
        let p = model.predict_proba(row);
        scores.push((p, *y));

        let clamped = p.clamp(1e-12, 1.0 - 1e-12);
        loss -= y * clamped.ln() + (1.0 - y) * (1.0 - clamped).ln();

        match (p >= 0.5, *y >= 0.5) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fneg += 1,
        }
    }

    let n = features.len().max(1) as f64;
    let accuracy = (tp + tn) as f64 / n;
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fneg > 0 {
        tp as f64 / (tp + fneg) as f64
    } else {
        0.0
    };

    let mut metrics = BTreeMap::new();
    metrics.insert(format!("{prefix}accuracy"), accuracy);
    metrics.insert(format!("{prefix}precision"), precision);
    metrics.insert(format!("{prefix}recall"), recall);
    metrics.insert(format!("{prefix}auc"), auc(&mut scores));
    metrics.insert(format!("{prefix}loss"), loss / n);
    metrics
}

/// Rank-based AUC (Mann-Whitney). Degenerate single-class sets score 0.5.
fn auc(scores: &mut [(f64, f64)]) -> f64 {
    let pos = scores.iter().filter(|(_, y)| *y >= 0.5).count();
    let neg = scores.len() - pos;
    if pos == 0 || neg == 0 {
        return 0.5;
    }

    scores.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum = 0.0;
    for (rank, (_, y)) in scores.iter().enumerate() {
        if *y >= 0.5 {
            rank_sum += (rank + 1) as f64;
        }
    }

    (rank_sum - (pos * (pos + 1)) as f64 / 2.0) / (pos * neg) as f64
}

/// Fisher-Yates shuffle of parallel slices with a xorshift generator.
fn shuffle(features: &mut [Vec<f64>], targets: &mut [f64], seed: u64) {
    let mut state = seed.max(1);
    let n = features.len();
    for i in (1..n).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        features.swap(i, j);
        targets.swap(i, j);
    }
}
