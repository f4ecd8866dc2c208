//! Label storage access
//!
//! The retraining pipeline never talks to customer/label storage directly;
//! it goes through the narrow [`LabelStore`] query contract. The bundled
//! [`MemoryLabelStore`] backs tests and single-process deployments; a
//! database-backed store plugs in behind the same trait.

use crate::models::{LabeledDataStats, LabeledRow};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Narrow query contract over customer records joined with churn labels.
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Feature columns every returned row carries, in order.
    fn feature_columns(&self) -> Vec<String>;

    /// All customers that have an associated label. When `since` is set,
    /// restricts to labels created or updated at/after that instant, so a
    /// corrected label re-enters the training window even if it was
    /// created long before.
    async fn labeled_rows(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LabeledRow>>;

    /// Aggregate statistics over all labels.
    async fn labeled_stats(&self) -> Result<LabeledDataStats>;
}

/// One labeled customer as held by the in-memory store.
#[derive(Debug, Clone)]
struct LabeledCustomer {
    customer_id: i64,
    features: Vec<f64>,
    target: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl LabeledCustomer {
    /// Effective label timestamp: an updated label counts as new.
    fn effective_time(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// In-memory [`LabelStore`] implementation.
pub struct MemoryLabelStore {
    feature_columns: Vec<String>,
    customers: RwLock<Vec<LabeledCustomer>>,
}

impl MemoryLabelStore {
    pub fn new(feature_columns: Vec<String>) -> Self {
        Self {
            feature_columns,
            customers: RwLock::new(Vec::new()),
        }
    }

    /// Insert a labeled customer. `features` must match the store's
    /// feature column count.
    pub async fn insert(&self, customer_id: i64, features: Vec<f64>, target: bool) -> Result<()> {
        self.insert_at(customer_id, features, target, Utc::now()).await
    }

    /// Insert with an explicit label creation time. Used when replaying
    /// historical data and in tests.
    pub async fn insert_at(
        &self,
        customer_id: i64,
        features: Vec<f64>,
        target: bool,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        if features.len() != self.feature_columns.len() {
            anyhow::bail!(
                "customer {} has {} features, store expects {}",
                customer_id,
                features.len(),
                self.feature_columns.len()
            );
        }

        let mut customers = self.customers.write().await;
        customers.push(LabeledCustomer {
            customer_id,
            features,
            target,
            created_at,
            updated_at: None,
        });
        Ok(())
    }

    /// Correct an existing label, stamping `updated_at` so the row
    /// re-enters the next incremental training window.
    pub async fn update_label(&self, customer_id: i64, target: bool) -> Result<()> {
        let mut customers = self.customers.write().await;
        let customer = customers
            .iter_mut()
            .find(|c| c.customer_id == customer_id)
            .ok_or_else(|| anyhow::anyhow!("no label found for customer {}", customer_id))?;

        customer.target = target;
        customer.updated_at = Some(Utc::now());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.customers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.customers.read().await.is_empty()
    }
}

#[async_trait]
impl LabelStore for MemoryLabelStore {
    fn feature_columns(&self) -> Vec<String> {
        self.feature_columns.clone()
    }

    async fn labeled_rows(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LabeledRow>> {
        let customers = self.customers.read().await;

        let rows = customers
            .iter()
            .filter(|c| match since {
                None => true,
                Some(t) => c.created_at >= t || c.updated_at.map(|u| u >= t).unwrap_or(false),
            })
            .map(|c| LabeledRow {
                customer_id: c.customer_id,
                features: c.features.clone(),
                target: c.target,
            })
            .collect();

        Ok(rows)
    }

    async fn labeled_stats(&self) -> Result<LabeledDataStats> {
        let customers = self.customers.read().await;

        if customers.is_empty() {
            return Ok(LabeledDataStats {
                total_labels: 0,
                churned: 0,
                not_churned: 0,
                oldest_label: None,
                newest_label: None,
            });
        }

        let churned = customers.iter().filter(|c| c.target).count();

        Ok(LabeledDataStats {
            total_labels: customers.len(),
            churned,
            not_churned: customers.len() - churned,
            oldest_label: customers.iter().map(|c| c.created_at).min(),
            newest_label: customers.iter().map(|c| c.effective_time()).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> MemoryLabelStore {
        MemoryLabelStore::new(vec!["f1".to_string(), "f2".to_string()])
    }

    #[tokio::test]
    async fn test_stats_empty_store() {
        let store = store();
        let stats = store.labeled_stats().await.unwrap();

        assert_eq!(stats.total_labels, 0);
        assert!(stats.oldest_label.is_none());
        assert!(stats.newest_label.is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_wrong_feature_count() {
        let store = store();
        let result = store.insert(1, vec![0.5], true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts_churn_distribution() {
        let store = store();
        store.insert(1, vec![0.1, 0.2], true).await.unwrap();
        store.insert(2, vec![0.3, 0.4], false).await.unwrap();
        store.insert(3, vec![0.5, 0.6], false).await.unwrap();

        let stats = store.labeled_stats().await.unwrap();
        assert_eq!(stats.total_labels, 3);
        assert_eq!(stats.churned, 1);
        assert_eq!(stats.not_churned, 2);
        assert!(stats.oldest_label.is_some());
    }

    #[tokio::test]
    async fn test_since_filter_excludes_old_labels() {
        let store = store();
        let old = Utc::now() - Duration::hours(2);
        store.insert_at(1, vec![0.1, 0.2], true, old).await.unwrap();
        store.insert(2, vec![0.3, 0.4], false).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        let rows = store.labeled_rows(Some(cutoff)).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_id, 2);
    }

    #[tokio::test]
    async fn test_updated_label_reenters_window() {
        let store = store();
        let old = Utc::now() - Duration::hours(2);
        store.insert_at(1, vec![0.1, 0.2], false, old).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        assert!(store.labeled_rows(Some(cutoff)).await.unwrap().is_empty());

        // Correcting the label stamps updated_at, pulling it back in
        store.update_label(1, true).await.unwrap();

        let rows = store.labeled_rows(Some(cutoff)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].target);
    }

    #[tokio::test]
    async fn test_newest_label_uses_update_time() {
        let store = store();
        let old = Utc::now() - Duration::hours(2);
        store.insert_at(1, vec![0.1, 0.2], false, old).await.unwrap();

        let before = store.labeled_stats().await.unwrap();
        store.update_label(1, true).await.unwrap();
        let after = store.labeled_stats().await.unwrap();

        assert!(after.newest_label.unwrap() > before.newest_label.unwrap());
        assert_eq!(after.oldest_label, before.oldest_label);
    }
}
