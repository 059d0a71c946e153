//! Detection state persistence port.

use async_trait::async_trait;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{DetectionRecord, DetectionStatus};

/// Repository interface for the per-workload detection state.
#[async_trait]
pub trait DetectionRepository: Send + Sync {
    /// Latest detection for a workload, if any.
    async fn get(&self, workload_uid: &str) -> DetectionResult<Option<DetectionRecord>>;

    /// Create the first detection record for a workload.
    async fn create(&self, record: &DetectionRecord) -> DetectionResult<()>;

    /// Replace an existing detection record.
    async fn update(&self, record: &DetectionRecord) -> DetectionResult<()>;

    /// Detections currently in the given status.
    async fn list_by_status(&self, status: DetectionStatus) -> DetectionResult<Vec<DetectionRecord>>;
}
