//! Per-framework pattern matching.
//!
//! A [`FrameworkMatcher`] compiles every enabled regex of one rule once and
//! answers scoring queries: log-line matching for training frameworks, and
//! weighted multi-axis scoring over process/image/env/port/cmdline signals
//! for inference frameworks. Matchers are immutable after construction;
//! the [`MatcherRegistry`] takes a write lock only to rebuild them.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::RwLock;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    CheckpointEventKind, FrameworkRule, InferencePatterns, PatternRule, TrainingEventKind,
};
use crate::services::rule_catalog::RuleCatalog;

/// Weight of each inference scoring axis.
pub const WEIGHT_PROCESS: f64 = 0.35;
pub const WEIGHT_IMAGE: f64 = 0.25;
pub const WEIGHT_ENV: f64 = 0.20;
pub const WEIGHT_PORT: f64 = 0.10;
pub const WEIGHT_CMDLINE: f64 = 0.10;

/// An inference match requires agreement from at least this many axes.
pub const MIN_MATCHED_AXES: usize = 2;

/// A pattern hit with its authored confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub name: String,
    pub confidence: f64,
}

/// A pattern hit carrying its named capture groups.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMatch {
    pub name: String,
    pub confidence: f64,
    pub captures: HashMap<String, String>,
}

/// Signals gathered from a running workload for inference scoring.
#[derive(Debug, Clone, Default)]
pub struct InferenceMatchContext {
    pub process_names: Vec<String>,
    pub cmdlines: Vec<String>,
    pub image: String,
    pub ports: Vec<u16>,
    pub env: HashMap<String, String>,
}

/// Outcome of inference scoring for one framework.
#[derive(Debug, Clone)]
pub struct InferenceMatchResult {
    pub matched: bool,
    pub framework: String,
    pub confidence: f64,
    /// Axis names that matched: process, image, env, port, cmdline.
    pub matched_sources: Vec<String>,
    /// Human-readable descriptions of which pattern matched what.
    pub evidence: Vec<String>,
}

impl InferenceMatchResult {
    fn unmatched(framework: &str) -> Self {
        Self {
            matched: false,
            framework: framework.to_string(),
            confidence: 0.0,
            matched_sources: Vec::new(),
            evidence: Vec::new(),
        }
    }
}

/// A compiled, enabled pattern.
struct CompiledPattern {
    name: String,
    regex: Regex,
    confidence: f64,
}

/// Compile the enabled patterns of one sequence. A compile failure is
/// logged and that pattern omitted; the matcher remains valid.
fn compile_patterns(framework: &str, group: &str, patterns: &[PatternRule]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter(|p| p.enabled)
        .filter_map(|p| match Regex::new(&p.regex) {
            Ok(regex) => Some(CompiledPattern {
                name: p.name.clone(),
                regex,
                confidence: p.confidence,
            }),
            Err(e) => {
                tracing::warn!(
                    framework,
                    group,
                    pattern = %p.name,
                    error = %e,
                    "skipping pattern with invalid regex"
                );
                None
            }
        })
        .collect()
}

struct CompiledInference {
    process: Vec<CompiledPattern>,
    cmdline: Vec<CompiledPattern>,
    cmdline_args: Vec<CompiledPattern>,
    image: Vec<CompiledPattern>,
    env: Vec<CompiledPattern>,
    ports: Vec<u16>,
}

impl CompiledInference {
    fn compile(framework: &str, block: &InferencePatterns) -> Self {
        Self {
            process: compile_patterns(framework, "inference.process", &block.process),
            cmdline: compile_patterns(framework, "inference.cmdline", &block.cmdline),
            cmdline_args: compile_patterns(framework, "inference.cmdline_args", &block.cmdline_args),
            image: compile_patterns(framework, "inference.image", &block.image),
            env: compile_patterns(framework, "inference.env", &block.env),
            ports: block.ports.clone(),
        }
    }
}

/// Contribution of one axis: the best-confidence matching pattern plus a
/// description per hit.
struct AxisScore {
    confidence: f64,
    evidence: Vec<String>,
}

fn score_axis<'a, I>(patterns: &[CompiledPattern], axis: &str, haystacks: I) -> Option<AxisScore>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let mut best: Option<f64> = None;
    let mut evidence = Vec::new();
    for pattern in patterns {
        for hay in haystacks.clone() {
            if pattern.regex.is_match(hay) {
                evidence.push(format!("{axis} pattern '{}' matched '{hay}'", pattern.name));
                best = Some(best.map_or(pattern.confidence, |b: f64| b.max(pattern.confidence)));
                break;
            }
        }
    }
    best.map(|confidence| AxisScore {
        confidence,
        evidence,
    })
}

/// Compiled matcher for one framework rule.
pub struct FrameworkMatcher {
    rule: Arc<FrameworkRule>,
    identify: Vec<CompiledPattern>,
    performance: Vec<CompiledPattern>,
    training_events: HashMap<TrainingEventKind, Vec<CompiledPattern>>,
    checkpoint_events: HashMap<CheckpointEventKind, Vec<CompiledPattern>>,
    inference: Option<CompiledInference>,
}

impl FrameworkMatcher {
    pub fn new(rule: Arc<FrameworkRule>) -> Self {
        let name = rule.name.clone();
        let identify = compile_patterns(&name, "identify", &rule.identify);
        let performance = compile_patterns(&name, "performance", &rule.performance);

        let training_events = rule
            .training_events
            .iter()
            .map(|(kind, patterns)| (*kind, compile_patterns(&name, kind.as_str(), patterns)))
            .collect();
        let checkpoint_events = rule
            .checkpoint_events
            .iter()
            .map(|(kind, patterns)| (*kind, compile_patterns(&name, kind.as_str(), patterns)))
            .collect();

        let inference = rule
            .inference
            .as_ref()
            .map(|block| CompiledInference::compile(&name, block));

        Self {
            rule,
            identify,
            performance,
            training_events,
            checkpoint_events,
            inference,
        }
    }

    pub fn rule(&self) -> &Arc<FrameworkRule> {
        &self.rule
    }

    pub fn framework(&self) -> &str {
        &self.rule.name
    }

    /// First identify pattern matching the line.
    pub fn match_identify(&self, line: &str) -> Option<PatternMatch> {
        first_match(&self.identify, line)
    }

    /// First performance pattern matching the line, with named groups.
    pub fn match_performance(&self, line: &str) -> Option<CaptureMatch> {
        first_capture_match(&self.performance, line)
    }

    /// First pattern of the given training event kind matching the line.
    pub fn match_training_event(
        &self,
        line: &str,
        kind: TrainingEventKind,
    ) -> Option<CaptureMatch> {
        self.training_events
            .get(&kind)
            .and_then(|patterns| first_capture_match(patterns, line))
    }

    /// First pattern of the given checkpoint event kind matching the line.
    pub fn match_checkpoint_event(
        &self,
        line: &str,
        kind: CheckpointEventKind,
    ) -> Option<CaptureMatch> {
        self.checkpoint_events
            .get(&kind)
            .and_then(|patterns| first_capture_match(patterns, line))
    }

    /// Fraction of lines hitting any identify pattern.
    pub fn calculate_match_score<S: AsRef<str>>(&self, lines: &[S]) -> f64 {
        if lines.is_empty() {
            return 0.0;
        }
        let hits = lines
            .iter()
            .filter(|line| self.match_identify(line.as_ref()).is_some())
            .count();
        hits as f64 / lines.len() as f64
    }

    /// Score an inference context across the five weighted axes.
    ///
    /// Reports a match only when at least [`MIN_MATCHED_AXES`] axes agree.
    pub fn match_inference(&self, ctx: &InferenceMatchContext) -> InferenceMatchResult {
        if !self.rule.is_inference() {
            return InferenceMatchResult::unmatched(&self.rule.name);
        }
        let Some(inf) = &self.inference else {
            return InferenceMatchResult::unmatched(&self.rule.name);
        };

        let mut matched_sources = Vec::new();
        let mut evidence = Vec::new();
        let mut total = 0.0;

        if let Some(axis) = score_axis(
            &inf.process,
            "process",
            ctx.process_names.iter().map(String::as_str),
        ) {
            total += WEIGHT_PROCESS * axis.confidence;
            matched_sources.push("process".to_string());
            evidence.extend(axis.evidence);
        }

        if !ctx.image.is_empty() {
            if let Some(axis) = score_axis(&inf.image, "image", [ctx.image.as_str()]) {
                total += WEIGHT_IMAGE * axis.confidence;
                matched_sources.push("image".to_string());
                evidence.extend(axis.evidence);
            }
        }

        let env_pairs: Vec<String> = ctx
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if let Some(axis) = score_axis(&inf.env, "env", env_pairs.iter().map(String::as_str)) {
            total += WEIGHT_ENV * axis.confidence;
            matched_sources.push("env".to_string());
            evidence.extend(axis.evidence);
        }

        // Port matching is binary: any shared port contributes full weight.
        if let Some(port) = inf.ports.iter().find(|p| ctx.ports.contains(p)) {
            total += WEIGHT_PORT;
            matched_sources.push("port".to_string());
            evidence.push(format!("port {port} exposed"));
        }

        let cmdline_axis = score_axis(
            &inf.cmdline,
            "cmdline",
            ctx.cmdlines.iter().map(String::as_str),
        );
        let args: Vec<&str> = ctx
            .cmdlines
            .iter()
            .flat_map(|c| c.split_whitespace())
            .collect();
        let arg_axis = score_axis(&inf.cmdline_args, "cmdline", args.iter().copied());
        match (cmdline_axis, arg_axis) {
            (None, None) => {}
            (a, b) => {
                let mut confidence: f64 = 0.0;
                for axis in [a, b].into_iter().flatten() {
                    confidence = confidence.max(axis.confidence);
                    evidence.extend(axis.evidence);
                }
                total += WEIGHT_CMDLINE * confidence;
                matched_sources.push("cmdline".to_string());
            }
        }

        if matched_sources.len() < MIN_MATCHED_AXES {
            return InferenceMatchResult::unmatched(&self.rule.name);
        }

        InferenceMatchResult {
            matched: true,
            framework: self.rule.name.clone(),
            confidence: total.min(1.0),
            matched_sources,
            evidence,
        }
    }
}

fn first_match(patterns: &[CompiledPattern], line: &str) -> Option<PatternMatch> {
    patterns
        .iter()
        .find(|p| p.regex.is_match(line))
        .map(|p| PatternMatch {
            name: p.name.clone(),
            confidence: p.confidence,
        })
}

fn first_capture_match(patterns: &[CompiledPattern], line: &str) -> Option<CaptureMatch> {
    for pattern in patterns {
        if let Some(caps) = pattern.regex.captures(line) {
            let mut captures = HashMap::new();
            for group in pattern.regex.capture_names().flatten() {
                if let Some(value) = caps.name(group) {
                    captures.insert(group.to_string(), value.as_str().to_string());
                }
            }
            return Some(CaptureMatch {
                name: pattern.name.clone(),
                confidence: pattern.confidence,
                captures,
            });
        }
    }
    None
}

/// One compiled matcher per framework, built from the catalog on demand.
pub struct MatcherRegistry {
    catalog: Arc<RuleCatalog>,
    matchers: RwLock<HashMap<String, Arc<FrameworkMatcher>>>,
}

impl MatcherRegistry {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self {
            catalog,
            matchers: RwLock::new(HashMap::new()),
        }
    }

    /// Matcher for one framework, building it from the catalog on first use.
    pub async fn matcher(&self, name: &str) -> DetectionResult<Arc<FrameworkMatcher>> {
        if let Some(matcher) = self.matchers.read().await.get(name) {
            return Ok(matcher.clone());
        }

        let rule = self.catalog.load_framework(name).await?;
        let matcher = Arc::new(FrameworkMatcher::new(rule));
        self.matchers
            .write()
            .await
            .insert(name.to_string(), matcher.clone());
        Ok(matcher)
    }

    /// Drop all matchers and rebuild from a refreshed catalog.
    pub async fn rebuild(&self) -> usize {
        let rules = self.catalog.refresh_cache().await;
        let mut matchers = HashMap::with_capacity(rules.len());
        for rule in rules {
            let name = rule.name.clone();
            matchers.insert(name, Arc::new(FrameworkMatcher::new(rule)));
        }
        let count = matchers.len();
        *self.matchers.write().await = matchers;
        count
    }

    /// Score a context against every enabled inference framework, matches
    /// first, confidence descending.
    pub async fn match_inference_all(
        &self,
        ctx: &InferenceMatchContext,
    ) -> Vec<InferenceMatchResult> {
        let mut results = Vec::new();
        for rule in self.catalog.get_inference_frameworks().await {
            match self.matcher(&rule.name).await {
                Ok(matcher) => {
                    let result = matcher.match_inference(ctx);
                    if result.matched {
                        results.push(result);
                    }
                }
                Err(e) => {
                    tracing::warn!(framework = %rule.name, error = %e, "matcher build failed");
                }
            }
        }
        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FrameworkType, PatternRule};

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

    fn vllm_rule() -> FrameworkRule {
        let mut rule = FrameworkRule::new("vllm");
        rule.framework_type = Some(FrameworkType::Inference);
        rule.inference = Some(InferencePatterns {
            process: vec![pattern("proc", r"vllm", 0.95)],
            cmdline: vec![pattern("cmd", r"vllm\.entrypoints", 0.85)],
            cmdline_args: vec![],
            image: vec![pattern("img", r"vllm/vllm-openai", 0.8)],
            env: vec![pattern("env", r"^VLLM_", 0.8)],
            ports: vec![8000],
            health_path: Some("/health".to_string()),
        });
        rule
    }

    fn full_context() -> InferenceMatchContext {
        InferenceMatchContext {
            process_names: vec![
                "python".to_string(),
                "vllm.entrypoints.openai.api_server".to_string(),
            ],
            cmdlines: vec![
                "python -m vllm.entrypoints.openai.api_server --model meta-llama/Llama-2-7b"
                    .to_string(),
            ],
            image: "vllm/vllm-openai:v0.4.0".to_string(),
            ports: vec![8000],
            env: [
                ("VLLM_HOST".to_string(), "0.0.0.0".to_string()),
                ("VLLM_PORT".to_string(), "8000".to_string()),
            ]
            .into(),
        }
    }

    #[test]
    fn test_identify_reports_exact_confidence() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.identify = vec![pattern("torch-import", r"import torch", 0.87)];
        let matcher = FrameworkMatcher::new(Arc::new(rule));

        let hit = matcher.match_identify("import torch as t").unwrap();
        assert_eq!(hit.name, "torch-import");
        assert_eq!(hit.confidence, 0.87);
        assert!(matcher.match_identify("import jax").is_none());
    }

    #[test]
    fn test_disabled_pattern_never_hits() {
        let mut rule = FrameworkRule::new("pytorch");
        let mut p = pattern("torch-import", r"import torch", 0.87);
        p.enabled = false;
        rule.identify = vec![p];
        let matcher = FrameworkMatcher::new(Arc::new(rule));
        assert!(matcher.match_identify("import torch").is_none());
    }

    #[test]
    fn test_invalid_regex_skipped_matcher_stays_valid() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.identify = vec![
            pattern("broken", r"[unclosed", 0.9),
            pattern("good", r"torch", 0.8),
        ];
        let matcher = FrameworkMatcher::new(Arc::new(rule));

        let hit = matcher.match_identify("torch 2.1").unwrap();
        assert_eq!(hit.name, "good");
    }

    #[test]
    fn test_performance_named_groups() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.performance = vec![pattern(
            "loss-line",
            r"loss=(?P<loss>[\d.]+) step=(?P<step>\d+)",
            0.9,
        )];
        let matcher = FrameworkMatcher::new(Arc::new(rule));

        let hit = matcher.match_performance("epoch 3 loss=0.231 step=1200").unwrap();
        assert_eq!(hit.captures["loss"], "0.231");
        assert_eq!(hit.captures["step"], "1200");
    }

    #[test]
    fn test_event_matching_scoped_by_kind() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.training_events.insert(
            TrainingEventKind::StartTraining,
            vec![pattern("start", r"training started", 0.9)],
        );
        rule.checkpoint_events.insert(
            CheckpointEventKind::StartSaving,
            vec![pattern("save", r"saving checkpoint", 0.9)],
        );
        let matcher = FrameworkMatcher::new(Arc::new(rule));

        assert!(matcher
            .match_training_event("training started at step 0", TrainingEventKind::StartTraining)
            .is_some());
        assert!(matcher
            .match_training_event("training started", TrainingEventKind::EndTraining)
            .is_none());
        assert!(matcher
            .match_checkpoint_event("saving checkpoint to /ckpt", CheckpointEventKind::StartSaving)
            .is_some());
    }

    #[test]
    fn test_match_score_is_hit_fraction() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.identify = vec![pattern("torch", r"torch", 0.9)];
        let matcher = FrameworkMatcher::new(Arc::new(rule));

        let lines = ["torch 2.1", "unrelated", "torchvision", "noise"];
        let score = matcher.calculate_match_score(&lines);
        assert!((score - 0.5).abs() < f64::EPSILON);
        assert_eq!(matcher.calculate_match_score::<&str>(&[]), 0.0);
    }

    #[test]
    fn test_inference_full_match() {
        let matcher = FrameworkMatcher::new(Arc::new(vllm_rule()));
        let result = matcher.match_inference(&full_context());

        assert!(result.matched);
        assert_eq!(result.framework, "vllm");
        for axis in ["process", "image", "port", "env"] {
            assert!(
                result.matched_sources.iter().any(|s| s == axis),
                "missing axis {axis}"
            );
        }
        assert!(result.confidence >= 0.80);
    }

    #[test]
    fn test_inference_single_axis_rejected() {
        let matcher = FrameworkMatcher::new(Arc::new(vllm_rule()));
        let ctx = InferenceMatchContext {
            ports: vec![8000],
            ..Default::default()
        };
        let result = matcher.match_inference(&ctx);
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_inference_weighted_sum() {
        let matcher = FrameworkMatcher::new(Arc::new(vllm_rule()));
        let ctx = InferenceMatchContext {
            image: "vllm/vllm-openai:v0.4.0".to_string(),
            ports: vec![8000],
            ..Default::default()
        };
        let result = matcher.match_inference(&ctx);
        assert!(result.matched);
        // image 0.25 * 0.8 + port 0.10
        assert!((result.confidence - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_training_rule_never_matches_inference() {
        let mut rule = FrameworkRule::new("pytorch");
        rule.inference = Some(InferencePatterns {
            process: vec![pattern("p", r"python", 0.9)],
            ports: vec![8000],
            ..Default::default()
        });
        let matcher = FrameworkMatcher::new(Arc::new(rule));
        assert!(!matcher.match_inference(&full_context()).matched);
    }
}
