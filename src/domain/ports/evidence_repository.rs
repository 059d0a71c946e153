//! Evidence persistence port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DetectionResult;
use crate::domain::models::EvidenceRecord;

/// Repository interface for detection evidence.
///
/// The store owns record ids; callers treat `id == 0` as unassigned.
#[async_trait]
pub trait EvidenceRepository: Send + Sync {
    /// Persist one record, returning its assigned id.
    async fn create(&self, record: &EvidenceRecord) -> DetectionResult<i64>;

    /// Persist a batch of records.
    async fn batch_create(&self, records: &[EvidenceRecord]) -> DetectionResult<()>;

    /// Insert or replace on (workload, source, framework), resetting the
    /// processed flag so the aggregator sees the refreshed observation.
    async fn upsert(&self, record: &EvidenceRecord) -> DetectionResult<()>;

    /// Unprocessed records for one workload, oldest first.
    async fn list_unprocessed(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>>;

    /// All records for one workload, oldest first.
    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>>;

    /// Distinct source names that have reported for one workload.
    async fn distinct_sources(&self, workload_uid: &str) -> DetectionResult<Vec<String>>;

    /// Flip the processed flag on the given records.
    async fn mark_processed(&self, ids: &[i64]) -> DetectionResult<()>;

    /// Delete records whose explicit expiration has passed. Returns the
    /// number deleted; deletion is idempotent per record.
    async fn delete_expired(&self, now: DateTime<Utc>, batch: usize) -> DetectionResult<u64>;

    /// Delete processed records older than the cutoff.
    async fn delete_processed_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> DetectionResult<u64>;

    /// Enforce the per-workload cap, dropping the oldest records first.
    /// Returns the number deleted.
    async fn prune_per_workload(&self, max_per_workload: usize) -> DetectionResult<u64>;
}
