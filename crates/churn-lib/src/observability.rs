//! Observability for the retraining pipeline
//!
//! Prometheus metrics covering cycle outcomes, training duration, and the
//! state of the version store. Exposed by the service binary on `/metrics`.

use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge};
use std::sync::OnceLock;

/// Training cycles are minutes long at worst; buckets are in seconds.
const TRAINING_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RetrainingMetricsInner> = OnceLock::new();

struct RetrainingMetricsInner {
    cycles_completed: IntCounter,
    cycles_skipped: IntCounter,
    cycles_failed: IntCounter,
    training_duration_seconds: Histogram,
    last_training_timestamp: IntGauge,
    versions_retained: IntGauge,
    labeled_samples: IntGauge,
}

impl RetrainingMetricsInner {
    fn new() -> Self {
        Self {
            cycles_completed: register_int_counter!(
                "churn_retraining_cycles_completed_total",
                "Retraining cycles that produced a new model version"
            )
            .expect("Failed to register cycles_completed"),

            cycles_skipped: register_int_counter!(
                "churn_retraining_cycles_skipped_total",
                "Retraining cycles skipped because no (new) labeled data existed"
            )
            .expect("Failed to register cycles_skipped"),

            cycles_failed: register_int_counter!(
                "churn_retraining_cycles_failed_total",
                "Retraining cycles that aborted with an error"
            )
            .expect("Failed to register cycles_failed"),

            training_duration_seconds: register_histogram!(
                "churn_retraining_duration_seconds",
                "Wall-clock duration of one full retraining cycle",
                TRAINING_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            last_training_timestamp: register_int_gauge!(
                "churn_last_training_timestamp_seconds",
                "Unix timestamp of the last successful retraining cycle"
            )
            .expect("Failed to register last_training_timestamp"),

            versions_retained: register_int_gauge!(
                "churn_model_versions_retained",
                "Number of model versions currently retained"
            )
            .expect("Failed to register versions_retained"),

            labeled_samples: register_int_gauge!(
                "churn_labeled_samples",
                "Number of labeled customer rows available for training"
            )
            .expect("Failed to register labeled_samples"),
        }
    }
}

/// Lightweight handle to the global retraining metrics.
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct RetrainingMetrics {
    _private: (),
}

impl Default for RetrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrainingMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RetrainingMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RetrainingMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_cycles_completed(&self) {
        self.inner().cycles_completed.inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn inc_cycles_failed(&self) {
        self.inner().cycles_failed.inc();
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn set_last_training_timestamp(&self, unix_secs: i64) {
        self.inner().last_training_timestamp.set(unix_secs);
    }

    pub fn set_versions_retained(&self, count: i64) {
        self.inner().versions_retained.set(count);
    }

    pub fn set_labeled_samples(&self, count: i64) {
        self.inner().labeled_samples.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_usable() {
        let metrics = RetrainingMetrics::new();

        metrics.inc_cycles_completed();
        metrics.inc_cycles_skipped();
        metrics.inc_cycles_failed();
        metrics.observe_training_duration(1.5);
        metrics.set_last_training_timestamp(1_700_000_000);
        metrics.set_versions_retained(3);
        metrics.set_labeled_samples(150);
    }
}
