//! Workload and pod lookup port.

use async_trait::async_trait;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{PodInfo, WorkloadRef, WorkloadStatus};

/// Read-only facade over the cluster's workload inventory.
#[async_trait]
pub trait WorkloadRepository: Send + Sync {
    /// Look up one workload by uid.
    async fn get(&self, uid: &str) -> DetectionResult<Option<WorkloadRef>>;

    /// Root workloads (no parent) in any of the given statuses, capped at
    /// `limit`.
    async fn list_root_by_status(
        &self,
        statuses: &[WorkloadStatus],
        limit: usize,
    ) -> DetectionResult<Vec<WorkloadRef>>;

    /// Direct children of a workload.
    async fn children(&self, uid: &str) -> DetectionResult<Vec<WorkloadRef>>;

    /// Pods backing a workload directly (children not included).
    async fn pods(&self, uid: &str) -> DetectionResult<Vec<PodInfo>>;
}
