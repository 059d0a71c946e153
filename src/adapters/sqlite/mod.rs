//! SQLite implementations of the persistence ports.

pub mod config_store;
pub mod connection;
pub mod detection_repository;
pub mod evidence_repository;
pub mod migrations;
pub mod task_repository;
pub mod workload_repository;

pub use config_store::SqliteConfigStore;
pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use detection_repository::SqliteDetectionRepository;
pub use evidence_repository::SqliteEvidenceRepository;
pub use migrations::run_migrations;
pub use task_repository::SqliteTaskRepository;
pub use workload_repository::SqliteWorkloadRepository;

use chrono::{DateTime, Utc};

use crate::domain::errors::{DetectionError, DetectionResult};

/// Parse an RFC 3339 column value.
pub(crate) fn parse_timestamp(value: &str) -> DetectionResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DetectionError::Serialization(format!("bad timestamp '{value}': {e}")))
}

/// Parse an optional RFC 3339 column value.
pub(crate) fn parse_timestamp_opt(
    value: Option<&str>,
) -> DetectionResult<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}
