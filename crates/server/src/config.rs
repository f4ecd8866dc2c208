//! Service configuration

use anyhow::Result;
use serde::Deserialize;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API server port for status/health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for transient training snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding the live artifact pair and the version archive
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    /// Arm the retraining timer at startup
    #[serde(default = "default_enable_scheduler")]
    pub enable_scheduler: bool,

    /// Hours between retraining runs
    #[serde(default = "default_retraining_interval_hours")]
    pub retraining_interval_hours: u64,

    /// Model versions retained before pruning
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,

    /// Training epochs per cycle
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Mini-batch size
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Fraction of each snapshot held out for validation
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_enable_scheduler() -> bool {
    true
}

fn default_retraining_interval_hours() -> u64 {
    24
}

fn default_max_versions() -> usize {
    3
}

fn default_epochs() -> usize {
    100
}

fn default_batch_size() -> usize {
    64
}

fn default_validation_split() -> f64 {
    0.2
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CHURN"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ServerConfig {
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            models_dir: default_models_dir(),
            enable_scheduler: default_enable_scheduler(),
            retraining_interval_hours: default_retraining_interval_hours(),
            max_versions: default_max_versions(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            validation_split: default_validation_split(),
        }))
    }
}
