//! Detection evidence domain model.
//!
//! One evidence record is a single observation from a single source that a
//! workload is running a particular framework, with a confidence. Records
//! accumulate per workload and are consumed by the aggregator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::framework::FrameworkLayer;

/// Where an observation came from. Each source carries a fixed voting
/// weight in the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    WandB,
    ImportDetection,
    UserOverride,
    Process,
    Env,
    Log,
    ActiveDetection,
    Image,
    Label,
    Default,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WandB => "wandb",
            Self::ImportDetection => "import_detection",
            Self::UserOverride => "user_override",
            Self::Process => "process",
            Self::Env => "env",
            Self::Log => "log",
            Self::ActiveDetection => "active_detection",
            Self::Image => "image",
            Self::Label => "label",
            Self::Default => "default",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wandb" => Some(Self::WandB),
            "import_detection" => Some(Self::ImportDetection),
            "user_override" => Some(Self::UserOverride),
            "process" => Some(Self::Process),
            "env" => Some(Self::Env),
            "log" => Some(Self::Log),
            "active_detection" => Some(Self::ActiveDetection),
            "image" => Some(Self::Image),
            "label" => Some(Self::Label),
            "default" => Some(Self::Default),
            _ => None,
        }
    }

    /// How the signal was obtained: passive sources are read from workload
    /// metadata and telemetry, active sources from on-cluster inspection.
    pub fn default_kind(&self) -> SourceKind {
        match self {
            Self::Process | Self::ActiveDetection => SourceKind::Active,
            _ => SourceKind::Passive,
        }
    }
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Passive signals are observed; active signals are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Passive,
    Active,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "passive" => Some(Self::Passive),
            "active" => Some(Self::Active),
            _ => None,
        }
    }
}

/// Kind of AI workload an evidence record (or detection) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Training,
    Inference,
    Unknown,
}

impl Default for WorkloadType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Inference => "inference",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "training" => Some(Self::Training),
            "inference" => Some(Self::Inference),
            "unknown" | "" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A loosely-typed configuration value reported by telemetry sources.
///
/// Truthiness is coerced in exactly one place: `is_truthy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<ConfigValue>),
    Map(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    /// True for `true`, `1`, `"true"`, and `"1"`. Everything else,
    /// including lists and maps, is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Num(n) => *n == 1.0,
            Self::Str(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            Self::List(_) | Self::Map(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Source-specific evidence payload, tagged by origin.
///
/// The variants carry what each collector actually observed; anything the
/// collector wants passed through opaquely goes into
/// [`EvidenceRecord::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidencePayload {
    WandB {
        project: String,
        #[serde(default)]
        config_keys: Vec<String>,
        #[serde(default)]
        pytorch_detected: bool,
    },
    Process {
        #[serde(default)]
        process_names: Vec<String>,
        #[serde(default)]
        cmdlines: Vec<String>,
    },
    Env {
        #[serde(default)]
        variables: HashMap<String, String>,
    },
    Image {
        image: String,
    },
    Label {
        #[serde(default)]
        labels: HashMap<String, String>,
    },
    Log {
        matched_pattern: String,
        #[serde(default)]
        sample_line: String,
    },
    Inference {
        #[serde(default)]
        matched_sources: Vec<String>,
        #[serde(default)]
        evidence: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_port: Option<u16>,
    },
    Generic {},
}

impl Default for EvidencePayload {
    fn default() -> Self {
        Self::Generic {}
    }
}

/// One persisted observation. Owned by the evidence store; the aggregator
/// reads it and flips `processed`, never mutates the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Store-assigned id; 0 until persisted.
    pub id: i64,
    pub workload_uid: String,
    pub source: EvidenceSource,
    pub source_kind: SourceKind,
    pub framework: String,
    /// All frameworks implicated by this observation, strongest first.
    #[serde(default)]
    pub frameworks: Vec<String>,
    pub workload_type: WorkloadType,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<FrameworkLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_framework: Option<String>,
    #[serde(default)]
    pub payload: EvidencePayload,
    /// Opaque collector pass-through, persisted verbatim.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub processed: bool,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to store one evidence record.
#[derive(Debug, Clone)]
pub struct StoreEvidenceRequest {
    pub workload_uid: String,
    pub source: EvidenceSource,
    pub source_kind: SourceKind,
    pub framework: String,
    pub frameworks: Vec<String>,
    pub workload_type: WorkloadType,
    pub confidence: f64,
    pub layer: Option<FrameworkLayer>,
    pub wrapper_framework: Option<String>,
    pub base_framework: Option<String>,
    pub payload: EvidencePayload,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoreEvidenceRequest {
    /// Request with source defaults and everything else empty.
    pub fn new(
        workload_uid: impl Into<String>,
        source: EvidenceSource,
        framework: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            workload_uid: workload_uid.into(),
            source,
            source_kind: source.default_kind(),
            framework: framework.into(),
            frameworks: Vec::new(),
            workload_type: WorkloadType::Unknown,
            confidence,
            layer: None,
            wrapper_framework: None,
            base_framework: None,
            payload: EvidencePayload::Generic {},
            extra: serde_json::Map::new(),
            expires_at: None,
        }
    }
}

/// Structured detection push from a W&B telemetry collector.
///
/// The collector forwards the run's config and environment plus its own
/// analysis: which Python modules were imported and which wrapper/base
/// frameworks the run metadata names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WandBDetectionRequest {
    pub workload_uid: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub config: HashMap<String, ConfigValue>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Module import flags as reported by telemetry, e.g. `torch: true`.
    #[serde(default)]
    pub modules: HashMap<String, ConfigValue>,
    #[serde(default)]
    pub wrapper_candidates: Vec<String>,
    #[serde(default)]
    pub base_candidates: Vec<String>,
}

impl WandBDetectionRequest {
    /// Whether telemetry saw the torch module loaded.
    pub fn pytorch_detected(&self) -> bool {
        self.modules
            .get("torch")
            .or_else(|| self.modules.get("pytorch"))
            .is_some_and(ConfigValue::is_truthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_coercion() {
        assert!(ConfigValue::Bool(true).is_truthy());
        assert!(ConfigValue::Num(1.0).is_truthy());
        assert!(ConfigValue::Str("true".into()).is_truthy());
        assert!(ConfigValue::Str("TRUE".into()).is_truthy());
        assert!(ConfigValue::Str("1".into()).is_truthy());

        assert!(!ConfigValue::Bool(false).is_truthy());
        assert!(!ConfigValue::Num(0.0).is_truthy());
        assert!(!ConfigValue::Num(2.0).is_truthy());
        assert!(!ConfigValue::Str("yes".into()).is_truthy());
        assert!(!ConfigValue::List(vec![]).is_truthy());
    }

    #[test]
    fn test_source_round_trip() {
        for source in [
            EvidenceSource::WandB,
            EvidenceSource::ImportDetection,
            EvidenceSource::UserOverride,
            EvidenceSource::Process,
            EvidenceSource::Env,
            EvidenceSource::Log,
            EvidenceSource::ActiveDetection,
            EvidenceSource::Image,
            EvidenceSource::Label,
            EvidenceSource::Default,
        ] {
            assert_eq!(EvidenceSource::from_str(source.as_str()), Some(source));
        }
    }

    #[test]
    fn test_pytorch_detected_via_modules() {
        let mut req = WandBDetectionRequest {
            workload_uid: "w-1".into(),
            ..Default::default()
        };
        assert!(!req.pytorch_detected());

        req.modules
            .insert("torch".into(), ConfigValue::Str("1".into()));
        assert!(req.pytorch_detected());
    }

    #[test]
    fn test_payload_json_tagging() {
        let payload = EvidencePayload::Image {
            image: "vllm/vllm-openai:v0.4.0".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "image");

        let back: EvidencePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
