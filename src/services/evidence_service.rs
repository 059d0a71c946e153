//! Evidence intake service.
//!
//! Collectors push observations here. The service normalizes them into
//! [`EvidenceRecord`]s, filling source kind, default workload type, layer
//! and wrapper/base attribution, and upserts them through the evidence
//! facade.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    EvidencePayload, EvidenceRecord, EvidenceSource, FrameworkLayer, StoreEvidenceRequest,
    WandBDetectionRequest, WorkloadType,
};
use crate::domain::ports::EvidenceRepository;
use crate::services::layer_resolver::LayerResolver;
use crate::services::pattern_matcher::InferenceMatchResult;

/// Evidence from import detection is the strongest single indicator.
pub const IMPORT_DETECTION_CONFIDENCE: f64 = 0.90;

/// Confidence for a W&B framework hint named explicitly in run metadata.
const WANDB_HINT_CONFIDENCE: f64 = 0.85;

/// Confidence for a framework inferred from W&B module import flags only.
const WANDB_MODULE_CONFIDENCE: f64 = 0.75;

/// Default record lifetime when the collector does not set one.
const DEFAULT_EXPIRATION_DAYS: i64 = 7;

/// Normalizes and stores detection evidence.
pub struct EvidenceService {
    repository: Arc<dyn EvidenceRepository>,
    layer_resolver: Arc<LayerResolver>,
    default_expiration: Duration,
}

impl EvidenceService {
    pub fn new(repository: Arc<dyn EvidenceRepository>, layer_resolver: Arc<LayerResolver>) -> Self {
        Self {
            repository,
            layer_resolver,
            default_expiration: Duration::days(DEFAULT_EXPIRATION_DAYS),
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = expiration;
        self
    }

    /// Store one observation.
    ///
    /// A request with an empty workload uid or framework name is dropped
    /// with a warning; a misbehaving collector must not fail the push
    /// path for everyone else.
    pub async fn store_evidence(&self, mut req: StoreEvidenceRequest) -> DetectionResult<()> {
        if req.workload_uid.is_empty() || req.framework.is_empty() {
            tracing::warn!(
                workload_uid = %req.workload_uid,
                source = %req.source,
                "dropping evidence with empty workload uid or framework"
            );
            return Ok(());
        }

        // W&B and env evidence carry their own layer attribution; every
        // other source is attributed through the resolver. Inference
        // evidence is pinned to the inference layer by its helper.
        if req.layer.is_none()
            && !matches!(req.source, EvidenceSource::WandB | EvidenceSource::Env)
        {
            let info = self.layer_resolver.resolve(&req.framework).await;
            req.layer = Some(info.layer);
            match info.layer {
                FrameworkLayer::Wrapper => {
                    req.wrapper_framework.get_or_insert_with(|| req.framework.clone());
                }
                FrameworkLayer::Orchestration | FrameworkLayer::Runtime => {
                    req.base_framework.get_or_insert_with(|| req.framework.clone());
                }
                FrameworkLayer::Inference => {}
            }
        }

        let now = Utc::now();
        let record = EvidenceRecord {
            id: 0,
            workload_uid: req.workload_uid,
            source: req.source,
            source_kind: req.source_kind,
            framework: req.framework.clone(),
            frameworks: if req.frameworks.is_empty() {
                vec![req.framework]
            } else {
                req.frameworks
            },
            workload_type: req.workload_type,
            confidence: req.confidence.clamp(0.0, 1.0),
            layer: req.layer,
            wrapper_framework: req.wrapper_framework,
            base_framework: req.base_framework,
            payload: req.payload,
            extra: req.extra,
            processed: false,
            detected_at: now,
            created_at: now,
            expires_at: req
                .expires_at
                .or_else(|| Some(now + self.default_expiration)),
        };

        self.repository.upsert(&record).await
    }

    /// Store evidence derived from a W&B telemetry push.
    ///
    /// Framework selection: an explicit wrapper candidate wins, then a
    /// base candidate, then pytorch when the torch module flag is truthy.
    /// A request naming nothing is dropped with a warning.
    pub async fn store_wandb_evidence(&self, req: &WandBDetectionRequest) -> DetectionResult<()> {
        let wrapper = req.wrapper_candidates.first().cloned();
        let base = req.base_candidates.first().cloned();

        let (framework, confidence, layer) = if let Some(name) = wrapper.clone() {
            (name, WANDB_HINT_CONFIDENCE, FrameworkLayer::Wrapper)
        } else if let Some(name) = base.clone() {
            (name, WANDB_HINT_CONFIDENCE, FrameworkLayer::Runtime)
        } else if req.pytorch_detected() {
            (
                "pytorch".to_string(),
                WANDB_MODULE_CONFIDENCE,
                FrameworkLayer::Runtime,
            )
        } else {
            tracing::warn!(
                workload_uid = %req.workload_uid,
                project = %req.project,
                "wandb push names no framework; dropping"
            );
            return Ok(());
        };

        let mut config_keys: Vec<String> = req.config.keys().cloned().collect();
        config_keys.sort();

        let mut store = StoreEvidenceRequest::new(
            req.workload_uid.clone(),
            EvidenceSource::WandB,
            framework,
            confidence,
        );
        store.workload_type = WorkloadType::Training;
        store.layer = Some(layer);
        store.wrapper_framework = wrapper;
        store.base_framework = base.or_else(|| req.pytorch_detected().then(|| "pytorch".to_string()));
        store.payload = EvidencePayload::WandB {
            project: req.project.clone(),
            config_keys,
            pytorch_detected: req.pytorch_detected(),
        };
        self.store_evidence(store).await
    }

    /// Evidence from process-table inspection.
    pub async fn store_process_evidence(
        &self,
        workload_uid: &str,
        framework: &str,
        confidence: f64,
        process_names: Vec<String>,
        cmdlines: Vec<String>,
    ) -> DetectionResult<()> {
        let mut req =
            StoreEvidenceRequest::new(workload_uid, EvidenceSource::Process, framework, confidence);
        req.workload_type = WorkloadType::Training;
        req.payload = EvidencePayload::Process {
            process_names,
            cmdlines,
        };
        self.store_evidence(req).await
    }

    /// Evidence from container environment variables.
    pub async fn store_env_evidence(
        &self,
        workload_uid: &str,
        framework: &str,
        confidence: f64,
        layer: Option<FrameworkLayer>,
        variables: HashMap<String, String>,
    ) -> DetectionResult<()> {
        let mut req =
            StoreEvidenceRequest::new(workload_uid, EvidenceSource::Env, framework, confidence);
        req.workload_type = WorkloadType::Training;
        req.layer = layer;
        req.payload = EvidencePayload::Env { variables };
        self.store_evidence(req).await
    }

    /// Evidence from the container image name.
    pub async fn store_image_evidence(
        &self,
        workload_uid: &str,
        framework: &str,
        confidence: f64,
        image: &str,
    ) -> DetectionResult<()> {
        let mut req =
            StoreEvidenceRequest::new(workload_uid, EvidenceSource::Image, framework, confidence);
        req.workload_type = WorkloadType::Training;
        req.payload = EvidencePayload::Image {
            image: image.to_string(),
        };
        self.store_evidence(req).await
    }

    /// Evidence from workload labels.
    pub async fn store_label_evidence(
        &self,
        workload_uid: &str,
        framework: &str,
        confidence: f64,
        labels: HashMap<String, String>,
    ) -> DetectionResult<()> {
        let mut req =
            StoreEvidenceRequest::new(workload_uid, EvidenceSource::Label, framework, confidence);
        req.workload_type = WorkloadType::Training;
        req.payload = EvidencePayload::Label { labels };
        self.store_evidence(req).await
    }

    /// Evidence from a log pattern hit.
    pub async fn store_log_evidence(
        &self,
        workload_uid: &str,
        framework: &str,
        confidence: f64,
        matched_pattern: &str,
        sample_line: &str,
    ) -> DetectionResult<()> {
        let mut req =
            StoreEvidenceRequest::new(workload_uid, EvidenceSource::Log, framework, confidence);
        req.workload_type = WorkloadType::Training;
        req.payload = EvidencePayload::Log {
            matched_pattern: matched_pattern.to_string(),
            sample_line: sample_line.to_string(),
        };
        self.store_evidence(req).await
    }

    /// Evidence from an inference matcher result. Always inference-layered.
    pub async fn store_inference_evidence(
        &self,
        workload_uid: &str,
        result: &InferenceMatchResult,
        endpoint_port: Option<u16>,
    ) -> DetectionResult<()> {
        let mut req = StoreEvidenceRequest::new(
            workload_uid,
            EvidenceSource::ActiveDetection,
            &result.framework,
            result.confidence,
        );
        req.workload_type = WorkloadType::Inference;
        req.layer = Some(FrameworkLayer::Inference);
        req.payload = EvidencePayload::Inference {
            matched_sources: result.matched_sources.clone(),
            evidence: result.evidence.clone(),
            endpoint_port,
        };
        self.store_evidence(req).await
    }

    /// A human says so. Highest-weight source after wandb.
    pub async fn store_user_override(
        &self,
        workload_uid: &str,
        framework: &str,
        workload_type: WorkloadType,
        confidence: f64,
    ) -> DetectionResult<()> {
        let mut req = StoreEvidenceRequest::new(
            workload_uid,
            EvidenceSource::UserOverride,
            framework,
            confidence,
        );
        req.workload_type = workload_type;
        self.store_evidence(req).await
    }

    /// Evidence from Python import tracing; fixed confidence.
    pub async fn store_import_detection(
        &self,
        workload_uid: &str,
        framework: &str,
    ) -> DetectionResult<()> {
        let mut req = StoreEvidenceRequest::new(
            workload_uid,
            EvidenceSource::ImportDetection,
            framework,
            IMPORT_DETECTION_CONFIDENCE,
        );
        req.workload_type = WorkloadType::Training;
        self.store_evidence(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryConfigStore, InMemoryEvidenceRepository};
    use crate::domain::models::ConfigValue;
    use crate::domain::ports::EvidenceRepository as _;
    use crate::services::rule_catalog::{RuleCatalog, FRAMEWORK_KEY_PREFIX};

    async fn service() -> (Arc<InMemoryEvidenceRepository>, EvidenceService) {
        let store = Arc::new(InMemoryConfigStore::default());
        store
            .put(
                &format!("{FRAMEWORK_KEY_PREFIX}primus"),
                r#"{"name": "primus", "layer": "wrapper"}"#,
            )
            .await;
        let catalog = Arc::new(RuleCatalog::new(store));
        let resolver = Arc::new(LayerResolver::new(catalog));
        let repository = Arc::new(InMemoryEvidenceRepository::default());
        let service = EvidenceService::new(repository.clone(), resolver);
        (repository, service)
    }

    #[tokio::test]
    async fn test_empty_workload_uid_dropped_non_fatally() {
        let (repo, service) = service().await;
        let req = StoreEvidenceRequest::new("", EvidenceSource::Process, "pytorch", 0.8);
        service.store_evidence(req).await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_layer_resolved_for_process_evidence() {
        let (repo, service) = service().await;
        service
            .store_process_evidence("w-1", "primus", 0.8, vec!["python".into()], vec![])
            .await
            .unwrap();

        let records = repo.list_by_workload("w-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].layer, Some(FrameworkLayer::Wrapper));
        assert_eq!(records[0].wrapper_framework.as_deref(), Some("primus"));
        assert!(records[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_framework_attributed_as_base() {
        let (repo, service) = service().await;
        service
            .store_image_evidence("w-1", "jax", 0.6, "jax/jax:latest")
            .await
            .unwrap();

        let records = repo.list_by_workload("w-1").await.unwrap();
        assert_eq!(records[0].layer, Some(FrameworkLayer::Runtime));
        assert_eq!(records[0].base_framework.as_deref(), Some("jax"));
    }

    #[tokio::test]
    async fn test_wandb_prefers_wrapper_candidate() {
        let (repo, service) = service().await;
        let req = WandBDetectionRequest {
            workload_uid: "w-1".into(),
            project: "llm-train".into(),
            wrapper_candidates: vec!["primus".into()],
            base_candidates: vec!["pytorch".into()],
            modules: [("torch".to_string(), ConfigValue::Bool(true))].into(),
            ..Default::default()
        };
        service.store_wandb_evidence(&req).await.unwrap();

        let records = repo.list_by_workload("w-1").await.unwrap();
        assert_eq!(records[0].framework, "primus");
        assert_eq!(records[0].source, EvidenceSource::WandB);
        assert_eq!(records[0].wrapper_framework.as_deref(), Some("primus"));
        assert_eq!(records[0].base_framework.as_deref(), Some("pytorch"));
        assert_eq!(records[0].layer, Some(FrameworkLayer::Wrapper));
    }

    #[tokio::test]
    async fn test_wandb_falls_back_to_module_flags() {
        let (repo, service) = service().await;
        let req = WandBDetectionRequest {
            workload_uid: "w-1".into(),
            modules: [("torch".to_string(), ConfigValue::Str("1".into()))].into(),
            ..Default::default()
        };
        service.store_wandb_evidence(&req).await.unwrap();

        let records = repo.list_by_workload("w-1").await.unwrap();
        assert_eq!(records[0].framework, "pytorch");
    }

    #[tokio::test]
    async fn test_wandb_with_no_signal_dropped() {
        let (repo, service) = service().await;
        let req = WandBDetectionRequest {
            workload_uid: "w-1".into(),
            ..Default::default()
        };
        service.store_wandb_evidence(&req).await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_push_upserts_instead_of_duplicating() {
        let (repo, service) = service().await;
        for _ in 0..3 {
            service
                .store_image_evidence("w-1", "vllm", 0.6, "vllm/vllm-openai:v0.4.0")
                .await
                .unwrap();
        }
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_import_detection_fixed_confidence() {
        let (repo, service) = service().await;
        service.store_import_detection("w-1", "pytorch").await.unwrap();
        let records = repo.list_by_workload("w-1").await.unwrap();
        assert_eq!(records[0].confidence, IMPORT_DETECTION_CONFIDENCE);
    }
}
