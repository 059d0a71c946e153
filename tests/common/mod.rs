//! Shared fixtures for integration tests.

use std::sync::Arc;

use chrono::Utc;

use sentinel::adapters::memory::{
    InMemoryConfigStore, InMemoryDetectionRepository, InMemoryEvidenceRepository,
    InMemoryTaskRepository, InMemoryWorkloadRepository,
};
use sentinel::domain::models::{PodInfo, PodPhase, WorkloadRef, WorkloadStatus};
use sentinel::services::detection_manager::{DetectionManager, DetectionManagerConfig};
use sentinel::services::rule_catalog::FRAMEWORK_KEY_PREFIX;

/// Everything an end-to-end test needs, backed by in-memory facades.
pub struct TestHarness {
    pub config_store: Arc<InMemoryConfigStore>,
    pub evidence: Arc<InMemoryEvidenceRepository>,
    pub detections: Arc<InMemoryDetectionRepository>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub workloads: Arc<InMemoryWorkloadRepository>,
    pub manager: Arc<DetectionManager>,
}

/// The vLLM serving rule with the standard five axes.
pub const VLLM_RULE: &str = r#"{
    "name": "vllm",
    "display_name": "vLLM",
    "type": "inference",
    "priority": 10,
    "inference": {
        "process": [{"name": "vllm-process", "regex": "vllm", "confidence": 0.95}],
        "cmdline": [{"name": "vllm-cmdline", "regex": "vllm\\.entrypoints", "confidence": 0.8}],
        "image": [{"name": "vllm-image", "regex": "vllm/vllm-openai", "confidence": 0.85}],
        "env": [{"name": "vllm-env", "regex": "VLLM_", "confidence": 0.8}],
        "ports": [8000],
        "health_path": "/health"
    }
}"#;

const PYTORCH_RULE: &str = r#"{
    "name": "pytorch",
    "display_name": "PyTorch",
    "layer": "runtime",
    "priority": 1,
    "identify": [
        {"name": "torch-import", "regex": "import torch", "confidence": 0.9},
        {"name": "torch-version", "regex": "torch [0-9.]+", "confidence": 0.8}
    ]
}"#;

const PRIMUS_RULE: &str = r#"{
    "name": "primus",
    "display_name": "Primus",
    "layer": "wrapper",
    "priority": 10,
    "identify": [{"name": "primus-banner", "regex": "primus", "confidence": 0.9}]
}"#;

const DEEPSPEED_RULE: &str = r#"{
    "name": "deepspeed",
    "display_name": "DeepSpeed",
    "layer": "orchestration",
    "priority": 5,
    "identify": [{"name": "ds-banner", "regex": "deepspeed", "confidence": 0.9}]
}"#;

const MEGATRON_RULE: &str = r#"{
    "name": "megatron",
    "display_name": "Megatron-LM",
    "layer": "orchestration",
    "priority": 5,
    "identify": [{"name": "megatron-banner", "regex": "megatron", "confidence": 0.9}]
}"#;

/// Build a harness with the standard rules seeded and the catalog warm.
pub async fn harness() -> TestHarness {
    let config_store = Arc::new(InMemoryConfigStore::default());
    for (name, doc) in [
        ("vllm", VLLM_RULE),
        ("pytorch", PYTORCH_RULE),
        ("primus", PRIMUS_RULE),
        ("deepspeed", DEEPSPEED_RULE),
        ("megatron", MEGATRON_RULE),
    ] {
        config_store
            .put(&format!("{FRAMEWORK_KEY_PREFIX}{name}"), doc)
            .await;
    }

    let evidence = Arc::new(InMemoryEvidenceRepository::default());
    let detections = Arc::new(InMemoryDetectionRepository::default());
    let tasks = Arc::new(InMemoryTaskRepository::default());
    let workloads = Arc::new(InMemoryWorkloadRepository::default());

    let manager = DetectionManager::bootstrap(
        config_store.clone(),
        evidence.clone(),
        detections.clone(),
        tasks.clone(),
        workloads.clone(),
        DetectionManagerConfig::default(),
    )
    .await;
    manager.catalog().load_all().await;

    TestHarness {
        config_store,
        evidence,
        detections,
        tasks,
        workloads,
        manager,
    }
}

impl TestHarness {
    /// Register a running root workload with one running pod.
    pub async fn seed_workload_with_pod(&self, uid: &str, pod_ip: &str) {
        self.workloads
            .add_workload(WorkloadRef {
                uid: uid.to_string(),
                name: format!("wl-{uid}"),
                parent_uid: None,
                status: WorkloadStatus::Running,
                created_at: Utc::now(),
            })
            .await;
        self.workloads
            .add_pod(
                uid,
                PodInfo {
                    name: format!("{uid}-pod-0"),
                    ip: pod_ip.to_string(),
                    phase: PodPhase::Running,
                    started_at: Some(Utc::now()),
                },
            )
            .await;
    }
}
