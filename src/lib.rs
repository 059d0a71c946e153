//! Sentinel - framework detection for AI workloads on GPU clusters.
//!
//! A multi-source detection pipeline:
//! - TTL-cached rule catalog over an external configuration store
//! - Per-framework regex matchers with weighted inference scoring
//! - Weighted-voting evidence aggregation with conflict detection
//! - Event-driven follow-up task orchestration with recovery scanning

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DetectionError, DetectionResult};
pub use services::detection_manager::{DetectionManager, DetectionManagerConfig};
