//! Detection state domain model.
//!
//! The aggregator fuses a workload's evidence into an [`AggregationResult`];
//! the most recent result is persisted per workload as a
//! [`DetectionRecord`]. State transitions fan out as [`DetectionEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::evidence::WorkloadType;
use crate::domain::models::framework::FrameworkLayer;

/// Confidence-derived classification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Unknown,
    Suspected,
    Confirmed,
    Verified,
    /// Two or more frameworks on comparable footing; see
    /// [`Conflict`].
    Conflict,
}

impl Default for DetectionStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Suspected => "suspected",
            Self::Confirmed => "confirmed",
            Self::Verified => "verified",
            Self::Conflict => "conflict",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "suspected" => Some(Self::Suspected),
            "confirmed" => Some(Self::Confirmed),
            "verified" => Some(Self::Verified),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }

    /// Confirmed and verified are both strong enough to act on.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Verified)
    }
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of the detection process for one workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLifecycle {
    InProgress,
    Completed,
}

impl Default for DetectionLifecycle {
    fn default() -> Self {
        Self::InProgress
    }
}

impl DetectionLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Two frameworks whose peak confidences both cleared the conflict
/// threshold in the same aggregation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub framework_a: String,
    pub confidence_a: f64,
    pub sources_a: Vec<String>,
    pub framework_b: String,
    pub confidence_b: f64,
    pub sources_b: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Output of one aggregation round for one workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub workload_uid: String,
    /// Winning framework; empty when nothing was observed.
    pub framework: String,
    /// All observed frameworks, total score descending.
    pub frameworks: Vec<String>,
    pub workload_type: WorkloadType,
    pub confidence: f64,
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<FrameworkLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_framework: Option<String>,
    pub evidence_count: usize,
    /// Distinct source names, sorted.
    pub sources: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl AggregationResult {
    /// Empty result for a workload with no evidence and no prior state.
    pub fn unknown(workload_uid: impl Into<String>) -> Self {
        Self {
            workload_uid: workload_uid.into(),
            framework: String::new(),
            frameworks: Vec::new(),
            workload_type: WorkloadType::Unknown,
            confidence: 0.0,
            status: DetectionStatus::Unknown,
            layer: None,
            wrapper_framework: None,
            base_framework: None,
            evidence_count: 0,
            sources: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Persisted per-workload detection state: the latest aggregation result
/// plus lifecycle flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub workload_uid: String,
    pub framework: String,
    pub frameworks: Vec<String>,
    pub workload_type: WorkloadType,
    pub confidence: f64,
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<FrameworkLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_framework: Option<String>,
    pub evidence_count: usize,
    pub sources: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    pub lifecycle: DetectionLifecycle,
    /// Stamped the first time status reaches confirmed or verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DetectionRecord {
    /// Build a fresh record from an aggregation result.
    pub fn from_result(result: &AggregationResult, now: DateTime<Utc>) -> Self {
        let settled = result.status.is_settled();
        Self {
            workload_uid: result.workload_uid.clone(),
            framework: result.framework.clone(),
            frameworks: result.frameworks.clone(),
            workload_type: result.workload_type,
            confidence: result.confidence,
            status: result.status,
            layer: result.layer,
            wrapper_framework: result.wrapper_framework.clone(),
            base_framework: result.base_framework.clone(),
            evidence_count: result.evidence_count,
            sources: result.sources.clone(),
            conflicts: result.conflicts.clone(),
            lifecycle: if settled {
                DetectionLifecycle::Completed
            } else {
                DetectionLifecycle::InProgress
            },
            confirmed_at: settled.then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a new aggregation result to an existing record.
    pub fn apply_result(&mut self, result: &AggregationResult, now: DateTime<Utc>) {
        self.framework = result.framework.clone();
        self.frameworks = result.frameworks.clone();
        self.workload_type = result.workload_type;
        self.confidence = result.confidence;
        self.status = result.status;
        self.layer = result.layer;
        self.wrapper_framework = result.wrapper_framework.clone();
        self.base_framework = result.base_framework.clone();
        self.evidence_count = result.evidence_count;
        self.sources = result.sources.clone();
        self.conflicts = result.conflicts.clone();
        if result.status.is_settled() {
            self.lifecycle = DetectionLifecycle::Completed;
            if self.confirmed_at.is_none() {
                self.confirmed_at = Some(now);
            }
        } else {
            self.lifecycle = DetectionLifecycle::InProgress;
        }
        self.updated_at = now;
    }

    /// Project the persisted state back into result form, for callers that
    /// aggregate with no new evidence.
    pub fn to_result(&self) -> AggregationResult {
        AggregationResult {
            workload_uid: self.workload_uid.clone(),
            framework: self.framework.clone(),
            frameworks: self.frameworks.clone(),
            workload_type: self.workload_type,
            confidence: self.confidence,
            status: self.status,
            layer: self.layer,
            wrapper_framework: self.wrapper_framework.clone(),
            base_framework: self.base_framework.clone(),
            evidence_count: self.evidence_count,
            sources: self.sources.clone(),
            conflicts: self.conflicts.clone(),
        }
    }
}

/// Kind of detection state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionEventKind {
    Created,
    Updated,
    Completed,
    Deleted,
}

impl DetectionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }
}

/// Detection state transition delivered to registered listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: Uuid,
    pub kind: DetectionEventKind,
    pub workload_uid: String,
    /// Snapshot at transition time; absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionRecord>,
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn new(kind: DetectionEventKind, detection: DetectionRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            workload_uid: detection.workload_uid.clone(),
            detection: Some(detection),
            timestamp: Utc::now(),
        }
    }

    pub fn deleted(workload_uid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: DetectionEventKind::Deleted,
            workload_uid: workload_uid.into(),
            detection: None,
            timestamp: Utc::now(),
        }
    }
}
