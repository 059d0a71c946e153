//! Follow-up task sink port.

use async_trait::async_trait;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{DetectionTask, DetectionTaskStatus, DetectionTaskType};

/// Sink for detection follow-up tasks.
///
/// The sink deduplicates on (workload uid, task type): upserting an
/// existing pair updates the stored task in place instead of creating a
/// second one.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create or update the task keyed by (workload uid, task type).
    async fn upsert(&self, task: &DetectionTask) -> DetectionResult<()>;

    /// Fetch the task for one (workload uid, task type) pair.
    async fn get(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
    ) -> DetectionResult<Option<DetectionTask>>;

    /// All tasks attached to one workload.
    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<DetectionTask>>;

    /// Move a task to a new status.
    async fn update_status(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
        status: DetectionTaskStatus,
    ) -> DetectionResult<()>;
}
