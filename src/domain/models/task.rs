//! Follow-up task domain model.
//!
//! Detection state transitions translate into typed tasks for downstream
//! collectors. Tasks are deduplicated on (workload uid, task type).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of collector the task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTaskType {
    /// Collect run metadata (tensorboard, metrics) for a confirmed
    /// training workload.
    MetadataCollection,
    /// Capture a profiler trace from a PyTorch-based training workload.
    ProfilerCollection,
    /// Scrape the serving stack's metrics endpoint.
    InferenceMetricsScrape,
    /// Drive active detection for a workload with no classification yet.
    DetectionCoordinator,
}

impl DetectionTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataCollection => "metadata_collection",
            Self::ProfilerCollection => "profiler_collection",
            Self::InferenceMetricsScrape => "inference_metrics_scrape",
            Self::DetectionCoordinator => "detection_coordinator",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "metadata_collection" => Some(Self::MetadataCollection),
            "profiler_collection" => Some(Self::ProfilerCollection),
            "inference_metrics_scrape" => Some(Self::InferenceMetricsScrape),
            "detection_coordinator" => Some(Self::DetectionCoordinator),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task execution status, owned by the downstream executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl Default for DetectionTaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl DetectionTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Pending and running tasks still claim their (workload, type) slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// A unit of work for a downstream collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionTask {
    pub workload_uid: String,
    pub task_type: DetectionTaskType,
    pub status: DetectionTaskStatus,
    pub priority: u32,
    /// Type-specific parameters (endpoints, timeouts, coordinator context).
    #[serde(default)]
    pub extensions: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DetectionTask {
    /// Pending task with the given type and priority.
    pub fn new(
        workload_uid: impl Into<String>,
        task_type: DetectionTaskType,
        priority: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            workload_uid: workload_uid.into(),
            task_type,
            status: DetectionTaskStatus::Pending,
            priority,
            extensions: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set one extension value, consuming and returning self.
    pub fn with_extension(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    /// Fetch an extension as a string, when present and string-typed.
    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).and_then(serde_json::Value::as_str)
    }
}
