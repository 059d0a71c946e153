//! Domain models
//!
//! Pure domain entities with validation rules. These models are
//! framework-agnostic and contain no infrastructure concerns.

pub mod detection;
pub mod evidence;
pub mod framework;
pub mod task;
pub mod workload;

pub use detection::{
    AggregationResult, Conflict, DetectionEvent, DetectionEventKind, DetectionLifecycle,
    DetectionRecord, DetectionStatus,
};
pub use evidence::{
    ConfigValue, EvidencePayload, EvidenceRecord, EvidenceSource, SourceKind,
    StoreEvidenceRequest, WandBDetectionRequest, WorkloadType,
};
pub use framework::{
    CheckpointEventKind, FrameworkLayer, FrameworkRule, FrameworkType, InferencePatterns,
    PatternRule, TrainingEventKind,
};
pub use task::{DetectionTask, DetectionTaskStatus, DetectionTaskType};
pub use workload::{PodInfo, PodPhase, WorkloadRef, WorkloadStatus};
