//! Detection module wiring.
//!
//! [`DetectionManager`] composes the rule catalog, matcher registry, layer
//! resolver, evidence service, aggregator, event bus, and task
//! orchestrator into one value created at startup and dependency-injected
//! into the surrounding shell. It owns the push API: store evidence,
//! aggregate, and publish the resulting state transition.

use std::sync::Arc;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    AggregationResult, DetectionEvent, DetectionEventKind, DetectionLifecycle, DetectionRecord,
    StoreEvidenceRequest, WandBDetectionRequest,
};
use crate::domain::ports::{
    ConfigStore, DetectionRepository, EvidenceRepository, TaskRepository, WorkloadRepository,
};
use crate::services::aggregator::{AggregatorConfig, EvidenceAggregator, SourceWeights};
use crate::services::event_bus::{DetectionEventBus, EvidenceBridge};
use crate::services::evidence_service::EvidenceService;
use crate::services::layer_resolver::LayerResolver;
use crate::services::pattern_matcher::MatcherRegistry;
use crate::services::rule_catalog::RuleCatalog;
use crate::services::task_orchestrator::{TaskOrchestrator, TaskOrchestratorListener};

/// Tuning knobs for the detection module.
#[derive(Debug, Clone)]
pub struct DetectionManagerConfig {
    pub auto_create_task: bool,
    pub weights: Option<SourceWeights>,
    pub aggregator: AggregatorConfig,
    pub catalog_ttl: std::time::Duration,
    pub evidence_expiration: chrono::Duration,
}

impl Default for DetectionManagerConfig {
    fn default() -> Self {
        Self {
            auto_create_task: true,
            weights: None,
            aggregator: AggregatorConfig::default(),
            catalog_ttl: crate::services::rule_catalog::DEFAULT_CACHE_TTL,
            evidence_expiration: chrono::Duration::days(7),
        }
    }
}

/// The detection module: every core component behind one handle.
pub struct DetectionManager {
    catalog: Arc<RuleCatalog>,
    matchers: Arc<MatcherRegistry>,
    layer_resolver: Arc<LayerResolver>,
    evidence_service: Arc<EvidenceService>,
    aggregator: Arc<EvidenceAggregator>,
    bus: Arc<DetectionEventBus>,
    orchestrator: Arc<TaskOrchestrator>,
    detections: Arc<dyn DetectionRepository>,
}

impl DetectionManager {
    /// Build the module over the given facades and register the standard
    /// listeners (evidence bridge, then task orchestrator).
    pub async fn bootstrap(
        config_store: Arc<dyn ConfigStore>,
        evidence_repo: Arc<dyn EvidenceRepository>,
        detection_repo: Arc<dyn DetectionRepository>,
        task_repo: Arc<dyn TaskRepository>,
        workload_repo: Arc<dyn WorkloadRepository>,
        config: DetectionManagerConfig,
    ) -> Arc<Self> {
        let catalog = Arc::new(RuleCatalog::with_ttl(config_store, config.catalog_ttl));
        let matchers = Arc::new(MatcherRegistry::new(catalog.clone()));
        let layer_resolver = Arc::new(LayerResolver::new(catalog.clone()));
        let evidence_service = Arc::new(
            EvidenceService::new(evidence_repo.clone(), layer_resolver.clone())
                .with_expiration(config.evidence_expiration),
        );

        let mut aggregator =
            EvidenceAggregator::new(evidence_repo.clone(), detection_repo.clone())
                .with_config(config.aggregator);
        if let Some(weights) = config.weights {
            aggregator = aggregator.with_weights(weights);
        }
        let aggregator = Arc::new(aggregator);

        let orchestrator = Arc::new(
            TaskOrchestrator::new(
                detection_repo.clone(),
                evidence_repo,
                task_repo,
                workload_repo,
                catalog.clone(),
            )
            .with_auto_create(config.auto_create_task),
        );

        let bus = Arc::new(DetectionEventBus::new());
        bus.register_listener(Arc::new(EvidenceBridge::new(evidence_service.clone())))
            .await;
        bus.register_listener(Arc::new(TaskOrchestratorListener::new(orchestrator.clone())))
            .await;

        Arc::new(Self {
            catalog,
            matchers,
            layer_resolver,
            evidence_service,
            aggregator,
            bus,
            orchestrator,
            detections: detection_repo,
        })
    }

    /// Aggregate a workload's queued evidence, persist the state, and emit
    /// the corresponding transition events.
    pub async fn aggregate_and_publish(
        &self,
        workload_uid: &str,
    ) -> DetectionResult<AggregationResult> {
        self.publish_inner(workload_uid, false).await
    }

    /// As [`Self::aggregate_and_publish`], but over the workload's entire
    /// evidence history.
    pub async fn aggregate_all_and_publish(
        &self,
        workload_uid: &str,
    ) -> DetectionResult<AggregationResult> {
        self.publish_inner(workload_uid, true).await
    }

    async fn publish_inner(
        &self,
        workload_uid: &str,
        all: bool,
    ) -> DetectionResult<AggregationResult> {
        let before = self.detections.get(workload_uid).await?;
        let result = if all {
            self.aggregator.aggregate_all(workload_uid).await?
        } else {
            self.aggregator.aggregate(workload_uid).await?
        };
        let after = self.detections.get(workload_uid).await?;

        for kind in transition_kinds(before.as_ref(), after.as_ref()) {
            if let Some(record) = &after {
                self.bus
                    .emit(&DetectionEvent::new(kind, record.clone()))
                    .await;
            }
        }
        Ok(result)
    }

    /// Push one evidence record and re-classify its workload over the full
    /// evidence history, so earlier consumed observations keep voting.
    pub async fn push_evidence(
        &self,
        req: StoreEvidenceRequest,
    ) -> DetectionResult<AggregationResult> {
        let workload_uid = req.workload_uid.clone();
        self.evidence_service.store_evidence(req).await?;
        self.aggregate_all_and_publish(&workload_uid).await
    }

    /// Push a W&B telemetry request and re-classify its workload.
    pub async fn push_wandb(
        &self,
        req: &WandBDetectionRequest,
    ) -> DetectionResult<AggregationResult> {
        self.evidence_service.store_wandb_evidence(req).await?;
        self.aggregate_all_and_publish(&req.workload_uid).await
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    pub fn matchers(&self) -> &Arc<MatcherRegistry> {
        &self.matchers
    }

    pub fn layer_resolver(&self) -> &Arc<LayerResolver> {
        &self.layer_resolver
    }

    pub fn evidence(&self) -> &Arc<EvidenceService> {
        &self.evidence_service
    }

    pub fn aggregator(&self) -> &Arc<EvidenceAggregator> {
        &self.aggregator
    }

    pub fn bus(&self) -> &Arc<DetectionEventBus> {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    pub fn detections(&self) -> &Arc<dyn DetectionRepository> {
        &self.detections
    }
}

/// Event kinds for a persisted-state transition. A first record emits
/// `created` (plus `completed` when it lands settled); later writes emit
/// `completed` on the in-progress → completed edge and `updated`
/// otherwise. An untouched record emits nothing.
fn transition_kinds(
    before: Option<&DetectionRecord>,
    after: Option<&DetectionRecord>,
) -> Vec<DetectionEventKind> {
    match (before, after) {
        (None, Some(after)) => {
            let mut kinds = vec![DetectionEventKind::Created];
            if after.lifecycle == DetectionLifecycle::Completed {
                kinds.push(DetectionEventKind::Completed);
            }
            kinds
        }
        (Some(before), Some(after)) if after.updated_at > before.updated_at => {
            if before.lifecycle != DetectionLifecycle::Completed
                && after.lifecycle == DetectionLifecycle::Completed
            {
                vec![DetectionEventKind::Completed]
            } else {
                vec![DetectionEventKind::Updated]
            }
        }
        _ => Vec::new(),
    }
}
