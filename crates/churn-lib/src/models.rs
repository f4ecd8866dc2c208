//! Core data models for the retraining service

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the binary label column in exported snapshots.
pub const TARGET_COLUMN: &str = "target";

/// Name of the customer identifier column in exported snapshots.
/// Carried through the snapshot for traceability, dropped before training.
pub const ID_COLUMN: &str = "id";

/// Feature columns of the customer record, in export order.
pub const DEFAULT_FEATURE_COLUMNS: &[&str] = &[
    "amount_rub_clo_prc",
    "sum_tran_aut_tendency3m",
    "cnt_tran_aut_tendency3m",
    "rest_avg_cur",
    "cr_prod_cnt_tovr",
    "trans_count_atm_prc",
    "amount_rub_atm_prc",
    "age",
    "cnt_tran_med_tendency3m",
    "sum_tran_med_tendency3m",
    "sum_tran_clo_tendency3m",
    "cnt_tran_clo_tendency3m",
    "cnt_tran_sup_tendency3m",
    "turnover_dynamic_cur_1m",
    "rest_dynamic_paym_3m",
    "sum_tran_sup_tendency3m",
    "sum_tran_atm_tendency3m",
    "sum_tran_sup_tendency1m",
    "sum_tran_atm_tendency1m",
    "cnt_tran_sup_tendency1m",
    "turnover_dynamic_cur_3m",
    "clnt_setup_tenor",
    "turnover_dynamic_paym_3m",
    "turnover_dynamic_paym_1m",
    "trans_amount_tendency3m",
    "trans_cnt_tendency3m",
    "pack_102",
    "pack_103",
    "pack_104",
    "pack_105",
];

/// Convenience accessor returning the default feature schema as owned strings.
pub fn default_feature_columns() -> Vec<String> {
    DEFAULT_FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect()
}

/// One labeled customer: the joined customer features plus the churn label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledRow {
    pub customer_id: i64,
    pub features: Vec<f64>,
    pub target: bool,
}

/// A materialized, self-contained set of labeled training rows produced by
/// one export call. Column-oriented: `columns` names every value in each row,
/// including the id and target columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub exported_at: DateTime<Utc>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl TrainingSnapshot {
    /// Write the snapshot as a JSON document. Snapshots are transient
    /// (consumed once and deleted), so no atomic rename is needed here.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("Failed to serialize training snapshot")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write training snapshot {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read training snapshot {:?}", path))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse training snapshot {:?}", path))
    }

    /// Position of a named column, case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Statistics about one export call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStats {
    pub total_records: usize,
    pub churned: usize,
    pub not_churned: usize,
    pub output_path: PathBuf,
    /// True when a time window was applied to the label query.
    pub filtered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_since: Option<DateTime<Utc>>,
}

/// Statistics about all labeled data currently in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDataStats {
    pub total_labels: usize,
    pub churned: usize,
    pub not_churned: usize,
    pub oldest_label: Option<DateTime<Utc>>,
    pub newest_label: Option<DateTime<Utc>>,
}

/// Whether a training run built a model from scratch or continued from
/// existing weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    Initial,
    Incremental,
}

/// Information about the data and settings of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub total_samples: usize,
    pub churned: usize,
    pub not_churned: usize,
    pub training_mode: TrainingMode,
    pub new_samples_only: bool,
    pub epochs: usize,
    pub batch_size: usize,
}

/// Immutable metadata describing one successful retraining cycle's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub model_checksum: String,
    pub scaler_checksum: String,
    pub metrics: BTreeMap<String, f64>,
    pub training_info: TrainingInfo,
}

/// Condensed view of a version for status reporting.
///
/// Metric fields prefer the validation-split values and fall back to the
/// training-only values when no validation split was used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version_id: String,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub auc: Option<f64>,
    pub recall: Option<f64>,
    pub precision: Option<f64>,
    pub samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");

        let snapshot = TrainingSnapshot {
            exported_at: Utc::now(),
            columns: vec!["id".to_string(), "age".to_string(), "target".to_string()],
            rows: vec![vec![1.0, 42.0, 0.0], vec![2.0, 35.0, 1.0]],
        };

        snapshot.save(&path).unwrap();
        let loaded = TrainingSnapshot::load(&path).unwrap();

        assert_eq!(loaded.columns, snapshot.columns);
        assert_eq!(loaded.rows.len(), 2);
    }

    #[test]
    fn test_column_index_case_insensitive() {
        let snapshot = TrainingSnapshot {
            exported_at: Utc::now(),
            columns: vec!["ID".to_string(), "age".to_string(), "target".to_string()],
            rows: vec![],
        };

        assert_eq!(snapshot.column_index("id"), Some(0));
        assert_eq!(snapshot.column_index("TARGET"), Some(2));
        assert_eq!(snapshot.column_index("missing"), None);
    }

    #[test]
    fn test_training_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&TrainingMode::Initial).unwrap(),
            "\"initial\""
        );
        assert_eq!(
            serde_json::to_string(&TrainingMode::Incremental).unwrap(),
            "\"incremental\""
        );
    }

    #[test]
    fn test_default_feature_columns_complete() {
        let columns = default_feature_columns();
        assert_eq!(columns.len(), 30);
        assert!(columns.contains(&"age".to_string()));
        assert!(!columns.contains(&TARGET_COLUMN.to_string()));
    }
}
