//! Framework rule domain model.
//!
//! A framework rule describes how one training or inference framework is
//! recognized: identify/performance/event regexes for log lines, and an
//! optional inference block matched against process, image, env, port, and
//! cmdline signals. Rules are authored as JSON documents in the external
//! configuration store and validated on load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DetectionError, DetectionResult};

/// Whether a framework is used to train models or to serve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkType {
    Training,
    Inference,
}

impl Default for FrameworkType {
    fn default() -> Self {
        Self::Training
    }
}

impl FrameworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Inference => "inference",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "training" => Some(Self::Training),
            "inference" => Some(Self::Inference),
            _ => None,
        }
    }
}

/// Which tier of the training stack a framework occupies.
///
/// Two frameworks on the same layer are competing claims; frameworks on
/// different layers can coexist (e.g. a wrapper driving a runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkLayer {
    /// High-level wrapper (primus, lightning).
    Wrapper,
    /// Distributed orchestration (deepspeed, megatron).
    Orchestration,
    /// Base runtime (pytorch, jax).
    Runtime,
    /// Serving stack (vllm, triton, tgi).
    Inference,
}

impl FrameworkLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrapper => "wrapper",
            Self::Orchestration => "orchestration",
            Self::Runtime => "runtime",
            Self::Inference => "inference",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wrapper" => Some(Self::Wrapper),
            "orchestration" => Some(Self::Orchestration),
            "runtime" => Some(Self::Runtime),
            "inference" => Some(Self::Inference),
            _ => None,
        }
    }

    /// Precedence within the layer conflict model: wrapper > orchestration >
    /// runtime. Inference is a separate track.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Wrapper => 3,
            Self::Orchestration => 2,
            Self::Runtime => 1,
            Self::Inference => 0,
        }
    }
}

/// Training lifecycle events recognized from log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingEventKind {
    StartTraining,
    EndTraining,
    PauseTraining,
    ResumeTraining,
}

impl TrainingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartTraining => "start_training",
            Self::EndTraining => "end_training",
            Self::PauseTraining => "pause_training",
            Self::ResumeTraining => "resume_training",
        }
    }
}

/// Checkpoint lifecycle events recognized from log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointEventKind {
    StartSaving,
    EndSaving,
    Loading,
}

impl CheckpointEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSaving => "start_saving",
            Self::EndSaving => "end_saving",
            Self::Loading => "loading",
        }
    }
}

/// A single named regex with a confidence weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_confidence() -> f64 {
    0.8
}

impl PatternRule {
    /// Validate structural constraints. Regex compilability is checked at
    /// matcher build time, not here.
    pub fn validate(&self, framework: &str) -> DetectionResult<()> {
        if self.name.is_empty() {
            return Err(DetectionError::InvalidPattern {
                framework: framework.to_string(),
                pattern: self.regex.clone(),
                reason: "pattern name is empty".to_string(),
            });
        }
        if self.regex.is_empty() {
            return Err(DetectionError::InvalidPattern {
                framework: framework.to_string(),
                pattern: self.name.clone(),
                reason: "pattern regex is empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::InvalidPattern {
                framework: framework.to_string(),
                pattern: self.name.clone(),
                reason: format!("confidence {} out of [0,1]", self.confidence),
            });
        }
        Ok(())
    }
}

/// Inference-mode signals for one serving framework.
///
/// Each sequence feeds one scoring axis of the inference matcher; ports are
/// matched exactly and `health_path` is informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferencePatterns {
    #[serde(default)]
    pub process: Vec<PatternRule>,
    #[serde(default)]
    pub cmdline: Vec<PatternRule>,
    #[serde(default)]
    pub cmdline_args: Vec<PatternRule>,
    #[serde(default)]
    pub image: Vec<PatternRule>,
    #[serde(default)]
    pub env: Vec<PatternRule>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
}

impl InferencePatterns {
    fn pattern_iter(&self) -> impl Iterator<Item = &PatternRule> {
        self.process
            .iter()
            .chain(self.cmdline.iter())
            .chain(self.cmdline_args.iter())
            .chain(self.image.iter())
            .chain(self.env.iter())
    }
}

/// Complete rule set for one framework, as authored in the config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkRule {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    /// Higher wins ties within a layer. Stored signed so that a negative
    /// authored value is rejected by validation instead of failing decode.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub framework_type: Option<FrameworkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<FrameworkLayer>,
    #[serde(default)]
    pub identify: Vec<PatternRule>,
    #[serde(default)]
    pub performance: Vec<PatternRule>,
    #[serde(default)]
    pub training_events: HashMap<TrainingEventKind, Vec<PatternRule>>,
    #[serde(default)]
    pub checkpoint_events: HashMap<CheckpointEventKind, Vec<PatternRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference: Option<InferencePatterns>,
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

impl FrameworkRule {
    /// Minimal rule with the given name, training-typed by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            version: String::new(),
            priority: 0,
            enabled: true,
            framework_type: None,
            layer: None,
            identify: Vec::new(),
            performance: Vec::new(),
            training_events: HashMap::new(),
            checkpoint_events: HashMap::new(),
            inference: None,
            extensions: HashMap::new(),
        }
    }

    /// Effective framework type: explicit value or training.
    pub fn framework_type(&self) -> FrameworkType {
        self.framework_type.unwrap_or_default()
    }

    /// Effective layer: explicit value, else inference for serving
    /// frameworks and runtime for everything else.
    pub fn layer(&self) -> FrameworkLayer {
        self.layer.unwrap_or(match self.framework_type() {
            FrameworkType::Inference => FrameworkLayer::Inference,
            FrameworkType::Training => FrameworkLayer::Runtime,
        })
    }

    pub fn is_training(&self) -> bool {
        self.framework_type() == FrameworkType::Training
    }

    pub fn is_inference(&self) -> bool {
        self.framework_type() == FrameworkType::Inference
    }

    /// Validate the rule and every pattern it carries.
    ///
    /// An invalid rule is not cached by the catalog. Unrecognized type or
    /// layer strings are rejected earlier, at JSON decode.
    pub fn validate(&self) -> DetectionResult<()> {
        if self.name.is_empty() {
            return Err(DetectionError::InvalidRule {
                name: self.name.clone(),
                reason: "framework name is empty".to_string(),
            });
        }
        if self.priority < 0 {
            return Err(DetectionError::InvalidRule {
                name: self.name.clone(),
                reason: format!("priority {} is negative", self.priority),
            });
        }
        for pattern in self.pattern_iter() {
            pattern.validate(&self.name)?;
        }
        Ok(())
    }

    /// Every pattern across all groups, in declaration order.
    fn pattern_iter(&self) -> impl Iterator<Item = &PatternRule> {
        self.identify
            .iter()
            .chain(self.performance.iter())
            .chain(self.training_events.values().flatten())
            .chain(self.checkpoint_events.values().flatten())
            .chain(
                self.inference
                    .iter()
                    .flat_map(InferencePatterns::pattern_iter),
            )
    }

    /// Look up an extension value, e.g. `metrics_port`.
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(name: &str, regex: &str, confidence: f64) -> PatternRule {
        PatternRule {
            name: name.to_string(),
            regex: regex.to_string(),
            description: String::new(),
            enabled: true,
            tags: Vec::new(),
            confidence,
        }
    }

    #[test]
    fn test_layer_defaults_by_type() {
        let mut rule = FrameworkRule::new("vllm");
        rule.framework_type = Some(FrameworkType::Inference);
        assert_eq!(rule.layer(), FrameworkLayer::Inference);

        let rule = FrameworkRule::new("pytorch");
        assert_eq!(rule.framework_type(), FrameworkType::Training);
        assert_eq!(rule.layer(), FrameworkLayer::Runtime);
    }

    #[test]
    fn test_explicit_layer_wins() {
        let mut rule = FrameworkRule::new("deepspeed");
        rule.layer = Some(FrameworkLayer::Orchestration);
        assert_eq!(rule.layer(), FrameworkLayer::Orchestration);
    }

    #[test]
    fn test_layer_priorities() {
        assert_eq!(FrameworkLayer::Wrapper.priority(), 3);
        assert_eq!(FrameworkLayer::Orchestration.priority(), 2);
        assert_eq!(FrameworkLayer::Runtime.priority(), 1);
        assert_eq!(FrameworkLayer::Inference.priority(), 0);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let rule = FrameworkRule::new("");
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_priority() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.priority = -1;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.identify.push(pattern("id", r"torch", 1.5));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_pattern_fields() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.identify.push(pattern("", r"torch", 0.9));
        assert!(rule.validate().is_err());

        let mut rule = FrameworkRule::new("pytorch");
        rule.identify.push(pattern("id", "", 0.9));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rule_json_round_trip() {
        let doc = r#"{
            "name": "vllm",
            "display_name": "vLLM",
            "type": "inference",
            "priority": 10,
            "inference": {
                "process": [{"name": "proc", "regex": "vllm", "confidence": 0.95}],
                "ports": [8000],
                "health_path": "/health"
            },
            "extensions": {"metrics_port": "8000"}
        }"#;

        let rule: FrameworkRule = serde_json::from_str(doc).unwrap();
        assert_eq!(rule.name, "vllm");
        assert!(rule.is_inference());
        assert_eq!(rule.layer(), FrameworkLayer::Inference);
        assert_eq!(rule.inference.as_ref().unwrap().ports, vec![8000]);
        assert_eq!(rule.extension("metrics_port"), Some("8000"));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_unrecognized_layer_fails_decode() {
        let doc = r#"{"name": "x", "layer": "hypervisor"}"#;
        assert!(serde_json::from_str::<FrameworkRule>(doc).is_err());
    }
}
