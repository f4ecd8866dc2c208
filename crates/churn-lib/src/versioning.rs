//! Model version management
//!
//! Archives successive model+scaler artifact pairs with metadata and keeps
//! only the most recent versions. The metadata document is the source of
//! truth: artifact copies happen before the metadata write, so a crash in
//! between leaves orphaned files that are never referenced, and the
//! document itself is replaced via write-temp-then-rename.

use crate::models::{TrainingInfo, VersionRecord, VersionSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of versions retained.
pub const DEFAULT_MAX_VERSIONS: usize = 3;

const METADATA_FILE: &str = "versions_metadata.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionsMetadata {
    versions: Vec<VersionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_version: Option<String>,
}

/// Manages versioned copies of trained model artifacts.
pub struct ModelVersionManager {
    versions_dir: PathBuf,
    metadata_path: PathBuf,
    max_versions: usize,
}

impl ModelVersionManager {
    pub fn new(models_dir: &Path, max_versions: usize) -> Result<Self> {
        let versions_dir = models_dir.join("versions");
        fs::create_dir_all(&versions_dir)
            .with_context(|| format!("Failed to create versions directory {:?}", versions_dir))?;

        Ok(Self {
            metadata_path: versions_dir.join(METADATA_FILE),
            versions_dir,
            max_versions,
        })
    }

    fn load_metadata(&self) -> Result<VersionsMetadata> {
        if !self.metadata_path.exists() {
            return Ok(VersionsMetadata::default());
        }
        let bytes = fs::read(&self.metadata_path)
            .with_context(|| format!("Failed to read {:?}", self.metadata_path))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {:?}", self.metadata_path))
    }

    /// Replace the whole metadata document atomically.
    fn save_metadata(&self, metadata: &VersionsMetadata) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(metadata).context("Failed to serialize version metadata")?;

        let temp_path = self.metadata_path.with_extension("json.tmp");
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp metadata file {:?}", temp_path))?;
        file.write_all(&json).context("Failed to write metadata")?;
        file.sync_all().context("Failed to sync metadata file")?;

        fs::rename(&temp_path, &self.metadata_path)
            .with_context(|| format!("Failed to rename {:?}", temp_path))?;
        Ok(())
    }

    /// Archive the artifact pair as a new version, prune beyond the
    /// retention cap, and return the new record.
    pub fn save_new_version(
        &self,
        model_path: &Path,
        scaler_path: &Path,
        metrics: &BTreeMap<String, f64>,
        training_info: &TrainingInfo,
    ) -> Result<VersionRecord> {
        let timestamp = Utc::now();
        // Nanosecond suffix keeps ids unique and lexicographically sortable
        // even for back-to-back saves
        let version_id = timestamp.format("%Y%m%d_%H%M%S_%f").to_string();
        let version_dir = self.versions_dir.join(format!("v_{}", version_id));
        fs::create_dir_all(&version_dir)
            .with_context(|| format!("Failed to create version directory {:?}", version_dir))?;

        let model_name = file_name(model_path)?;
        let scaler_name = file_name(scaler_path)?;
        let versioned_model = version_dir.join(model_name);
        let versioned_scaler = version_dir.join(scaler_name);

        // Copy artifacts before touching metadata: a crash here orphans the
        // copies but never references them
        fs::copy(model_path, &versioned_model)
            .with_context(|| format!("Failed to copy model to {:?}", versioned_model))?;
        fs::copy(scaler_path, &versioned_scaler)
            .with_context(|| format!("Failed to copy scaler to {:?}", versioned_scaler))?;

        let record = VersionRecord {
            version_id: version_id.clone(),
            timestamp,
            model_checksum: checksum_file(&versioned_model)?,
            scaler_checksum: checksum_file(&versioned_scaler)?,
            model_path: versioned_model,
            scaler_path: versioned_scaler,
            metrics: metrics.clone(),
            training_info: training_info.clone(),
        };

        let mut metadata = self.load_metadata()?;
        metadata.versions.push(record.clone());
        metadata
            .versions
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        // Prune beyond the retention cap: backing directories first, then
        // the metadata entries
        if metadata.versions.len() > self.max_versions {
            for evicted in metadata.versions.drain(self.max_versions..) {
                let old_dir = evicted
                    .model_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.versions_dir.join(format!("v_{}", evicted.version_id)));
                if old_dir.exists() {
                    fs::remove_dir_all(&old_dir)
                        .with_context(|| format!("Failed to delete old version {:?}", old_dir))?;
                }
                info!(version_id = %evicted.version_id, "Deleted old model version");
            }
        }

        metadata.latest_version = metadata.versions.first().map(|v| v.version_id.clone());
        self.save_metadata(&metadata)?;

        info!(
            version_id = %version_id,
            total_versions = metadata.versions.len(),
            "Saved model version"
        );

        Ok(record)
    }

    /// Most recent version, or `None` when no versions exist.
    pub fn get_latest_version(&self) -> Result<Option<VersionRecord>> {
        Ok(self.load_metadata()?.versions.into_iter().next())
    }

    pub fn get_version(&self, version_id: &str) -> Result<Option<VersionRecord>> {
        Ok(self
            .load_metadata()?
            .versions
            .into_iter()
            .find(|v| v.version_id == version_id))
    }

    /// All versions, newest first.
    pub fn list_versions(&self) -> Result<Vec<VersionRecord>> {
        Ok(self.load_metadata()?.versions)
    }

    /// Copy a version's artifact pair back over the live locations. Both
    /// files are replaced via atomic rename so a concurrent reader never
    /// observes a torn artifact.
    pub fn restore_version(
        &self,
        version_id: &str,
        target_model_path: &Path,
        target_scaler_path: &Path,
    ) -> Result<bool> {
        let Some(version) = self.get_version(version_id)? else {
            warn!(version_id = %version_id, "Version not found for restore");
            return Ok(false);
        };

        copy_atomic(&version.scaler_path, target_scaler_path)?;
        copy_atomic(&version.model_path, target_model_path)?;

        info!(version_id = %version_id, "Restored version to current model");
        Ok(true)
    }

    /// Condensed per-version view with the validation-metric fallback:
    /// prefer `val_*` names, fall back to training-only names for cycles
    /// that ran without a validation split.
    pub fn get_version_summary(&self) -> Result<Vec<VersionSummary>> {
        let versions = self.list_versions()?;
        Ok(versions
            .into_iter()
            .map(|v| VersionSummary {
                accuracy: metric_with_fallback(&v.metrics, "accuracy"),
                auc: metric_with_fallback(&v.metrics, "auc"),
                recall: metric_with_fallback(&v.metrics, "recall"),
                precision: metric_with_fallback(&v.metrics, "precision"),
                samples: v.training_info.total_samples,
                version_id: v.version_id,
                timestamp: v.timestamp,
            })
            .collect())
    }
}

fn metric_with_fallback(metrics: &BTreeMap<String, f64>, name: &str) -> Option<f64> {
    metrics
        .get(&format!("val_{name}"))
        .or_else(|| metrics.get(name))
        .copied()
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| anyhow::anyhow!("artifact path {:?} has no file name", path))
}

/// SHA256 checksum of a file, hex encoded.
fn checksum_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Copy via temp file + rename in the destination directory.
fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let temp_path = dst.with_extension("tmp");
    fs::copy(src, &temp_path)
        .with_context(|| format!("Failed to copy {:?} to {:?}", src, temp_path))?;
    fs::rename(&temp_path, dst)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, dst))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingMode;
    use tempfile::TempDir;

    fn training_info(samples: usize) -> TrainingInfo {
        TrainingInfo {
            total_samples: samples,
            churned: samples / 3,
            not_churned: samples - samples / 3,
            training_mode: TrainingMode::Initial,
            new_samples_only: false,
            epochs: 100,
            batch_size: 64,
        }
    }

    fn write_artifacts(dir: &Path, tag: &str) -> (PathBuf, PathBuf) {
        let model = dir.join("model.json");
        let scaler = dir.join("scaler.json");
        fs::write(&model, format!("{{\"weights\":[{}]}}", tag.len())).unwrap();
        fs::write(&scaler, format!("{{\"means\":[{}]}}", tag.len() * 2)).unwrap();
        (model, scaler)
    }

    fn metrics(accuracy: f64) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("val_accuracy".to_string(), accuracy);
        m.insert("val_auc".to_string(), 0.9);
        m
    }

    #[tokio::test]
    async fn test_save_creates_versioned_copies_and_metadata() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let record = manager
            .save_new_version(&model, &scaler, &metrics(0.8), &training_info(100))
            .unwrap();

        assert!(record.model_path.exists());
        assert!(record.scaler_path.exists());
        assert_eq!(record.model_checksum.len(), 64);
        assert_ne!(record.model_checksum, record.scaler_checksum);

        let latest = manager.get_latest_version().unwrap().unwrap();
        assert_eq!(latest.version_id, record.version_id);
        assert_eq!(latest.training_info.total_samples, 100);
    }

    #[tokio::test]
    async fn test_retention_cap_prunes_oldest() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let mut ids = Vec::new();
        for i in 0..4 {
            let record = manager
                .save_new_version(&model, &scaler, &metrics(0.5 + i as f64 / 10.0), &training_info(10))
                .unwrap();
            ids.push(record.version_id);
        }

        let versions = manager.list_versions().unwrap();
        assert_eq!(versions.len(), 3);

        // Newest first, oldest evicted
        assert_eq!(versions[0].version_id, ids[3]);
        assert!(versions.iter().all(|v| v.version_id != ids[0]));

        // Evicted backing directory is gone, retained ones exist
        let evicted_dir = dir.path().join("versions").join(format!("v_{}", ids[0]));
        assert!(!evicted_dir.exists());
        for v in &versions {
            assert!(v.model_path.exists());
            assert!(v.scaler_path.exists());
        }
    }

    #[tokio::test]
    async fn test_list_sorted_descending_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 5).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        for _ in 0..3 {
            manager
                .save_new_version(&model, &scaler, &metrics(0.8), &training_info(10))
                .unwrap();
        }

        let versions = manager.list_versions().unwrap();
        for pair in versions.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_latest_is_none_without_versions() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        assert!(manager.get_latest_version().unwrap().is_none());
        assert!(manager.list_versions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_prefers_validation_metrics() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        manager
            .save_new_version(&model, &scaler, &metrics(0.85), &training_info(50))
            .unwrap();

        let summary = manager.get_version_summary().unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].accuracy, Some(0.85));
        assert_eq!(summary[0].samples, 50);
        // No recall metric at all
        assert_eq!(summary[0].recall, None);
    }

    #[tokio::test]
    async fn test_summary_falls_back_to_training_metrics() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let mut train_only = BTreeMap::new();
        train_only.insert("accuracy".to_string(), 0.7);
        train_only.insert("auc".to_string(), 0.75);

        manager
            .save_new_version(&model, &scaler, &train_only, &training_info(50))
            .unwrap();

        let summary = manager.get_version_summary().unwrap();
        assert_eq!(summary[0].accuracy, Some(0.7));
        assert_eq!(summary[0].auc, Some(0.75));
    }

    #[tokio::test]
    async fn test_restore_version() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let record = manager
            .save_new_version(&model, &scaler, &metrics(0.8), &training_info(10))
            .unwrap();

        // Overwrite the live files, then restore
        fs::write(&model, "corrupted").unwrap();
        let restored = manager
            .restore_version(&record.version_id, &model, &scaler)
            .unwrap();
        assert!(restored);

        let contents = fs::read_to_string(&model).unwrap();
        assert!(contents.contains("weights"));
    }

    #[tokio::test]
    async fn test_restore_unknown_version_returns_false() {
        let dir = TempDir::new().unwrap();
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let restored = manager.restore_version("nope", &model, &scaler).unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn test_metadata_survives_reload() {
        let dir = TempDir::new().unwrap();
        let (model, scaler) = write_artifacts(dir.path(), "a");

        let id = {
            let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
            manager
                .save_new_version(&model, &scaler, &metrics(0.8), &training_info(10))
                .unwrap()
                .version_id
        };

        // A fresh manager over the same directory sees the same state
        let manager = ModelVersionManager::new(dir.path(), 3).unwrap();
        let latest = manager.get_latest_version().unwrap().unwrap();
        assert_eq!(latest.version_id, id);
    }
}
