//! Domain errors for the detection engine.

use thiserror::Error;

/// Errors produced by the detection core.
///
/// Per-entry configuration problems and per-pattern compile failures are
/// logged and skipped at their call sites; only errors that must stop the
/// current operation surface through this type.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Invalid framework rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("Invalid pattern '{pattern}' in framework '{framework}': {reason}")]
    InvalidPattern {
        framework: String,
        pattern: String,
        reason: String,
    },

    #[error("Framework not found: {0}")]
    FrameworkNotFound(String),

    #[error("Workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("Configuration store error: {0}")]
    ConfigStore(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DetectionResult<T> = Result<T, DetectionError>;

impl From<sqlx::Error> for DetectionError {
    fn from(err: sqlx::Error) -> Self {
        DetectionError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DetectionError {
    fn from(err: serde_json::Error) -> Self {
        DetectionError::Serialization(err.to_string())
    }
}
