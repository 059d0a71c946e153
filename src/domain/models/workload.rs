//! Workload and pod lookup model.
//!
//! The core never talks to the cluster API directly; it consumes these
//! shapes through the workload lookup facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster-level workload status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Pod phase as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One pod backing a workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    /// Empty until the pod has an address.
    #[serde(default)]
    pub ip: String,
    pub phase: PodPhase,
    pub started_at: Option<DateTime<Utc>>,
}

impl PodInfo {
    /// A pod the scraper can reach right now.
    pub fn is_reachable(&self) -> bool {
        self.phase == PodPhase::Running && !self.ip.is_empty()
    }
}

/// A workload as seen through the lookup facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub uid: String,
    pub name: String,
    /// Empty for root workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uid: Option<String>,
    pub status: WorkloadStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkloadRef {
    pub fn is_root(&self) -> bool {
        self.parent_uid.as_deref().is_none_or(str::is_empty)
    }
}
