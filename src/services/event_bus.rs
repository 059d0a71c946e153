//! Detection event fan-out.
//!
//! The detection manager emits state transitions through this bus.
//! Listeners run synchronously in registration order; a listener error is
//! logged and the chain continues.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{DetectionEvent, DetectionEventKind, StoreEvidenceRequest, EvidenceSource};
use crate::services::evidence_service::EvidenceService;

/// A consumer of detection state transitions.
#[async_trait]
pub trait DetectionListener: Send + Sync {
    /// Listener name, used in dispatch logs.
    fn name(&self) -> &str;

    async fn on_detection_event(&self, event: &DetectionEvent) -> DetectionResult<()>;
}

/// Ordered listener registry.
#[derive(Default)]
pub struct DetectionEventBus {
    listeners: tokio::sync::RwLock<Vec<Arc<dyn DetectionListener>>>,
}

impl DetectionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Dispatch order is registration order.
    pub async fn register_listener(&self, listener: Arc<dyn DetectionListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Deliver an event to every listener, in order. Errors are logged and
    /// never abort the chain.
    pub async fn emit(&self, event: &DetectionEvent) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(e) = listener.on_detection_event(event).await {
                tracing::warn!(
                    listener = listener.name(),
                    workload_uid = %event.workload_uid,
                    kind = event.kind.as_str(),
                    error = %e,
                    "detection listener failed"
                );
            }
        }
    }
}

/// Adapter feeding legacy detection results into the evidence pipeline.
///
/// The legacy detector publishes snapshots with no source attribution; the
/// bridge converts those into `active_detection` evidence so the weighted
/// aggregation sees them. Snapshots produced by the aggregator itself
/// always carry sources and are ignored here.
pub struct EvidenceBridge {
    evidence: Arc<EvidenceService>,
}

impl EvidenceBridge {
    pub fn new(evidence: Arc<EvidenceService>) -> Self {
        Self { evidence }
    }
}

#[async_trait]
impl DetectionListener for EvidenceBridge {
    fn name(&self) -> &str {
        "evidence-bridge"
    }

    async fn on_detection_event(&self, event: &DetectionEvent) -> DetectionResult<()> {
        if !matches!(
            event.kind,
            DetectionEventKind::Updated | DetectionEventKind::Completed
        ) {
            return Ok(());
        }
        let Some(detection) = &event.detection else {
            return Ok(());
        };
        if !detection.sources.is_empty() || detection.framework.is_empty() {
            return Ok(());
        }

        let mut req = StoreEvidenceRequest::new(
            detection.workload_uid.clone(),
            EvidenceSource::ActiveDetection,
            detection.framework.clone(),
            detection.confidence,
        );
        req.frameworks = detection.frameworks.clone();
        req.workload_type = detection.workload_type;
        req.layer = detection.layer;
        req.wrapper_framework = detection.wrapper_framework.clone();
        req.base_framework = detection.base_framework.clone();
        self.evidence.store_evidence(req).await
    }
}
