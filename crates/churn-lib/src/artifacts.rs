//! Model and scaler artifacts
//!
//! The serving path reads the live artifact pair from fixed filesystem
//! paths with no coordination beyond those paths, so every write here goes
//! through write-temp-then-rename. The pair invariant: scaler and model are
//! always replaced together, and a pair whose feature sets disagree is
//! refused at load time.

use crate::error::ArtifactError;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Feature-scaling parameters paired with a model: per-column mean and
/// standard deviation for standard scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub feature_columns: Vec<String>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl ScalerArtifact {
    /// Fit scaling parameters on feature rows.
    pub fn fit(feature_columns: Vec<String>, rows: &[Vec<f64>]) -> Self {
        let dim = feature_columns.len();
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; dim];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }

        let mut stds = vec![0.0; dim];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m) * (v - m);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt();
        }

        Self {
            feature_columns,
            means,
            stds,
        }
    }

    /// Scale one feature row in place. Zero-variance columns pass through
    /// centered only.
    pub fn transform(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.means).zip(&self.stds) {
            *v -= m;
            if *s > f64::EPSILON {
                *v /= s;
            }
        }
    }

    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        save_json_atomic(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// Logistic decision function over scaled features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_columns: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl ModelArtifact {
    /// Zero-initialized model for the given feature set.
    pub fn zeroed(feature_columns: Vec<String>) -> Self {
        let dim = feature_columns.len();
        Self {
            feature_columns,
            weights: vec![0.0; dim],
            bias: 0.0,
        }
    }

    /// Churn probability for one scaled feature row.
    pub fn predict_proba(&self, scaled: &[f64]) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(scaled)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        save_json_atomic(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// The fixed filesystem locations of the currently-serving model and scaler.
#[derive(Debug, Clone)]
pub struct ArtifactPair {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
}

impl ArtifactPair {
    pub fn new(model_path: impl Into<PathBuf>, scaler_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            scaler_path: scaler_path.into(),
        }
    }

    /// Default pair layout inside a models directory.
    pub fn in_dir(models_dir: &Path) -> Self {
        Self::new(models_dir.join("model.json"), models_dir.join("scaler.json"))
    }

    /// Both artifacts are present on disk.
    pub fn exists(&self) -> bool {
        self.model_path.exists() && self.scaler_path.exists()
    }

    /// Load both artifacts, refusing a pair whose feature sets disagree.
    pub fn load_checked(&self) -> Result<(ModelArtifact, ScalerArtifact), ArtifactError> {
        if !self.model_path.exists() {
            return Err(ArtifactError::NotFound {
                path: self.model_path.display().to_string(),
            });
        }
        if !self.scaler_path.exists() {
            return Err(ArtifactError::NotFound {
                path: self.scaler_path.display().to_string(),
            });
        }

        let model = ModelArtifact::load(&self.model_path)?;
        let scaler = ScalerArtifact::load(&self.scaler_path)?;

        if model.feature_columns != scaler.feature_columns {
            return Err(ArtifactError::FeatureMismatch {
                model: model.feature_columns.len(),
                scaler: scaler.feature_columns.len(),
            });
        }

        Ok((model, scaler))
    }
}

/// Serialize to a temp file, fsync, then rename into place so concurrent
/// readers never observe a torn artifact.
fn save_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize artifact")?;

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp artifact file {:?}", temp_path))?;
    file.write_all(&json).context("Failed to write artifact")?;
    file.sync_all().context("Failed to sync artifact file")?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read artifact {:?}", path))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse artifact {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cols() -> Vec<String> {
        vec!["f1".to_string(), "f2".to_string()]
    }

    #[test]
    fn test_scaler_fit_and_transform() {
        let rows = vec![vec![0.0, 10.0], vec![2.0, 10.0], vec![4.0, 10.0]];
        let scaler = ScalerArtifact::fit(cols(), &rows);

        assert!((scaler.means[0] - 2.0).abs() < 1e-9);
        assert!((scaler.means[1] - 10.0).abs() < 1e-9);

        let mut row = vec![4.0, 10.0];
        scaler.transform(&mut row);
        assert!(row[0] > 0.0);
        // Zero-variance column is centered only
        assert!((row[1]).abs() < 1e-9);
    }

    #[test]
    fn test_model_predict_proba_bounds() {
        let model = ModelArtifact {
            feature_columns: cols(),
            weights: vec![3.0, -2.0],
            bias: 0.5,
        };

        let p = model.predict_proba(&[1.0, 1.0]);
        assert!(p > 0.0 && p < 1.0);

        let zeroed = ModelArtifact::zeroed(cols());
        assert!((zeroed.predict_proba(&[1.0, 1.0]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_atomic_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");

        let model = ModelArtifact {
            feature_columns: cols(),
            weights: vec![0.25, -0.75],
            bias: 0.125,
        };
        model.save_atomic(&path).unwrap();

        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.weights, model.weights);
        assert_eq!(loaded.bias, model.bias);
    }

    #[test]
    fn test_pair_load_checked_rejects_mismatch() {
        let dir = TempDir::new().unwrap();
        let pair = ArtifactPair::in_dir(dir.path());

        let model = ModelArtifact::zeroed(cols());
        let scaler = ScalerArtifact::fit(vec!["f1".to_string()], &[vec![1.0]]);
        model.save_atomic(&pair.model_path).unwrap();
        scaler.save_atomic(&pair.scaler_path).unwrap();

        let result = pair.load_checked();
        assert!(matches!(
            result,
            Err(ArtifactError::FeatureMismatch { model: 2, scaler: 1 })
        ));
    }

    #[test]
    fn test_pair_load_checked_missing_half() {
        let dir = TempDir::new().unwrap();
        let pair = ArtifactPair::in_dir(dir.path());

        ModelArtifact::zeroed(cols())
            .save_atomic(&pair.model_path)
            .unwrap();

        assert!(!pair.exists());
        assert!(matches!(
            pair.load_checked(),
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[test]
    fn test_pair_load_checked_ok() {
        let dir = TempDir::new().unwrap();
        let pair = ArtifactPair::in_dir(dir.path());

        let scaler = ScalerArtifact::fit(cols(), &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        let model = ModelArtifact::zeroed(cols());
        scaler.save_atomic(&pair.scaler_path).unwrap();
        model.save_atomic(&pair.model_path).unwrap();

        assert!(pair.exists());
        let (m, s) = pair.load_checked().unwrap();
        assert_eq!(m.feature_columns, s.feature_columns);
    }
}
