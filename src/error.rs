//! Error types for the insights engine and its store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Data format error in record {index} ({field}): {reason}")]
    DataFormat {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("Cannot compare version '{new}' with persisted version '{persisted}': {reason}")]
    VersionComparison {
        new: String,
        persisted: String,
        reason: String,
    },

    #[error("Partial for metric '{found}' cannot be combined into '{expected}'")]
    MetricMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Shard worker failed: {0}")]
    Worker(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metric '{0}' is missing from the store")]
    MissingMetric(String),

    #[error("Stored value for metric '{metric}' is invalid: {reason}")]
    InvalidMetric { metric: String, reason: String },
}

pub type Result<T> = std::result::Result<T, InsightsError>;
