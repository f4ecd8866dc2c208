//! Labeled-data export
//!
//! Materializes labeled customer rows from the store into a self-contained
//! training snapshot. Purely read-then-materialize; label storage is never
//! mutated.

use crate::error::ExportError;
use crate::models::{
    ExportStats, LabeledDataStats, TrainingSnapshot, ID_COLUMN, TARGET_COLUMN,
};
use crate::store::LabelStore;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Exports labeled customer data into training snapshots.
pub struct LabeledDataExporter {
    store: Arc<dyn LabelStore>,
}

impl LabeledDataExporter {
    pub fn new(store: Arc<dyn LabelStore>) -> Self {
        Self { store }
    }

    /// Export labeled rows to a snapshot at `output_path`.
    ///
    /// When `include_all` is false and `since` is set, only rows whose label
    /// was created or updated at/after `since` are included. Zero matching
    /// rows in that mode is the expected steady state between trainings and
    /// returns zeroed stats without writing a file. Zero rows on a full
    /// export is an error: retraining cannot proceed without any data.
    pub async fn export(
        &self,
        output_path: &Path,
        since: Option<DateTime<Utc>>,
        include_all: bool,
    ) -> Result<ExportStats, ExportError> {
        let window = if include_all { None } else { since };
        let rows = self
            .store
            .labeled_rows(window)
            .await
            .map_err(ExportError::Query)?;

        if rows.is_empty() {
            if include_all {
                return Err(ExportError::NoLabeledData);
            }
            // Incremental query with no new data: nothing to materialize.
            return Ok(ExportStats {
                total_records: 0,
                churned: 0,
                not_churned: 0,
                output_path: output_path.to_path_buf(),
                filtered: window.is_some(),
                filter_since: window,
            });
        }

        let feature_columns = self.store.feature_columns();
        let mut columns = Vec::with_capacity(feature_columns.len() + 2);
        columns.push(ID_COLUMN.to_string());
        columns.extend(feature_columns);
        columns.push(TARGET_COLUMN.to_string());

        let churned = rows.iter().filter(|r| r.target).count();
        let total_records = rows.len();

        let snapshot_rows = rows
            .into_iter()
            .map(|r| {
                let mut values = Vec::with_capacity(r.features.len() + 2);
                // The id column rides along in the numeric row for
                // traceability; ids are exact up to 2^53 and the trainer
                // drops the column before fitting
                values.push(r.customer_id as f64);
                values.extend(r.features);
                values.push(if r.target { 1.0 } else { 0.0 });
                values
            })
            .collect();

        let snapshot = TrainingSnapshot {
            exported_at: Utc::now(),
            columns,
            rows: snapshot_rows,
        };
        snapshot.save(output_path).map_err(ExportError::Write)?;

        info!(
            total_records,
            churned,
            not_churned = total_records - churned,
            path = %output_path.display(),
            "Exported labeled training data"
        );

        Ok(ExportStats {
            total_records,
            churned,
            not_churned: total_records - churned,
            output_path: output_path.to_path_buf(),
            filtered: window.is_some(),
            filter_since: window,
        })
    }

    /// Aggregate statistics over all labeled data in the store.
    pub async fn labeled_stats(&self) -> Result<LabeledDataStats, ExportError> {
        self.store.labeled_stats().await.map_err(ExportError::Query)
    }
}
