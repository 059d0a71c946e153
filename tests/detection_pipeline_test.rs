//! End-to-end pipeline tests: push evidence, aggregate, observe detection
//! state and follow-up tasks.

mod common;

use std::collections::HashMap;

use sentinel::domain::models::{
    DetectionStatus, DetectionTaskType, EvidenceSource, StoreEvidenceRequest, WorkloadType,
};
use sentinel::domain::ports::{DetectionRepository, EvidenceRepository, TaskRepository};
use sentinel::services::pattern_matcher::InferenceMatchContext;

use common::harness;

fn vllm_context() -> InferenceMatchContext {
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
        env: HashMap::from([
            ("VLLM_HOST".to_string(), "0.0.0.0".to_string()),
            ("VLLM_PORT".to_string(), "8000".to_string()),
        ]),
    }
}

#[tokio::test]
async fn vllm_full_context_matches_with_high_confidence() {
    let h = harness().await;
    let matcher = h.manager.matchers().matcher("vllm").await.unwrap();
    let result = matcher.match_inference(&vllm_context());

    assert!(result.matched);
    assert_eq!(result.framework, "vllm");
    for axis in ["process", "image", "port", "env"] {
        assert!(
            result.matched_sources.iter().any(|s| s == axis),
            "expected axis {axis} in {:?}",
            result.matched_sources
        );
    }
    assert!(result.confidence >= 0.80, "got {}", result.confidence);
}

#[tokio::test]
async fn port_alone_does_not_match() {
    let h = harness().await;
    let matcher = h.manager.matchers().matcher("vllm").await.unwrap();
    let result = matcher.match_inference(&InferenceMatchContext {
        ports: vec![8000],
        ..Default::default()
    });
    assert!(!result.matched);
}

#[tokio::test]
async fn agreeing_sources_verify_the_winner() {
    let h = harness().await;

    let pushes = [
        (EvidenceSource::WandB, 0.90),
        (EvidenceSource::Process, 0.70),
        (EvidenceSource::Image, 0.60),
    ];
    let mut last = None;
    for (source, confidence) in pushes {
        let req = StoreEvidenceRequest::new("w-1", source, "primus", confidence);
        last = Some(h.manager.push_evidence(req).await.unwrap());
    }

    let result = last.unwrap();
    assert_eq!(result.framework, "primus");
    assert_eq!(result.status, DetectionStatus::Verified);
    // Peak 0.90 + 0.05 per extra source = 1.000 capped.
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.sources, vec!["image", "process", "wandb"]);
}

#[tokio::test]
async fn competing_frameworks_conflict() {
    let h = harness().await;
    h.manager
        .push_evidence(StoreEvidenceRequest::new(
            "w-1",
            EvidenceSource::WandB,
            "primus",
            0.85,
        ))
        .await
        .unwrap();
    let result = h
        .manager
        .push_evidence(StoreEvidenceRequest::new(
            "w-1",
            EvidenceSource::Process,
            "deepspeed",
            0.80,
        ))
        .await
        .unwrap();

    assert_eq!(result.status, DetectionStatus::Conflict);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].framework_a, "primus");
    assert_eq!(result.conflicts[0].framework_b, "deepspeed");
}

#[tokio::test]
async fn megatron_detection_fires_pytorch_profiler_path() {
    let h = harness().await;
    let mut req = StoreEvidenceRequest::new("w-1", EvidenceSource::WandB, "megatron", 0.85);
    req.workload_type = WorkloadType::Training;
    let result = h.manager.push_evidence(req).await.unwrap();
    assert!(result.status.is_settled());

    // Megatron is PyTorch-based: the profiler fires alongside metadata.
    assert!(h
        .tasks
        .get("w-1", DetectionTaskType::ProfilerCollection)
        .await
        .unwrap()
        .is_some());
    assert!(h
        .tasks
        .get("w-1", DetectionTaskType::MetadataCollection)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn confirmed_inference_workload_gets_scrape_task() {
    let h = harness().await;
    h.seed_workload_with_pod("w-infer", "10.0.0.5").await;

    let mut req =
        StoreEvidenceRequest::new("w-infer", EvidenceSource::ActiveDetection, "vllm", 0.95);
    req.workload_type = WorkloadType::Inference;
    let result = h.manager.push_evidence(req).await.unwrap();
    assert!(result.status.is_settled());

    let task = h
        .tasks
        .get("w-infer", DetectionTaskType::InferenceMetricsScrape)
        .await
        .unwrap()
        .expect("scrape task");
    assert_eq!(task.extensions["pod_ip"], serde_json::json!("10.0.0.5"));
    assert_eq!(task.extensions["port"], serde_json::json!(8000));
    assert_eq!(task.extensions["path"], serde_json::json!("/metrics"));
}

#[tokio::test]
async fn evidence_round_trip_and_idempotent_reaggregation() {
    let h = harness().await;

    // Store evidence; it is visible as unprocessed.
    let req = StoreEvidenceRequest::new("w-1", EvidenceSource::WandB, "pytorch", 0.90);
    h.manager.evidence().store_evidence(req).await.unwrap();
    let unprocessed = h.evidence.list_unprocessed("w-1").await.unwrap();
    assert_eq!(unprocessed.len(), 1);
    assert_eq!(unprocessed[0].framework, "pytorch");

    // Aggregate consumes it.
    let first = h.manager.aggregate_and_publish("w-1").await.unwrap();
    assert!(h.evidence.list_unprocessed("w-1").await.unwrap().is_empty());
    let tasks_after_first = h.tasks.len().await;

    // A second aggregation with no new evidence returns the persisted
    // state and creates no further tasks.
    let second = h.manager.aggregate_and_publish("w-1").await.unwrap();
    assert_eq!(second.framework, first.framework);
    assert_eq!(second.confidence, first.confidence);
    assert_eq!(second.status, first.status);
    assert_eq!(h.tasks.len().await, tasks_after_first);
}

#[tokio::test]
async fn detection_state_persists_lifecycle() {
    let h = harness().await;

    // Weak evidence first: in progress.
    h.manager
        .push_evidence(StoreEvidenceRequest::new(
            "w-1",
            EvidenceSource::Label,
            "pytorch",
            0.45,
        ))
        .await
        .unwrap();
    let record = h.detections.get("w-1").await.unwrap().unwrap();
    assert_eq!(record.status, DetectionStatus::Suspected);
    assert!(record.confirmed_at.is_none());

    // Strong corroboration: completed, stamped once.
    h.manager
        .push_evidence(StoreEvidenceRequest::new(
            "w-1",
            EvidenceSource::ImportDetection,
            "pytorch",
            0.90,
        ))
        .await
        .unwrap();
    let record = h.detections.get("w-1").await.unwrap().unwrap();
    assert!(record.status.is_settled());
    assert!(record.confirmed_at.is_some());
}

#[tokio::test]
async fn catalog_listings_reflect_seeded_rules() {
    let h = harness().await;
    let mut training = h.manager.catalog().list_training_frameworks().await;
    training.sort();
    assert_eq!(training, vec!["deepspeed", "megatron", "primus", "pytorch"]);
    assert_eq!(
        h.manager.catalog().list_inference_frameworks().await,
        vec!["vllm"]
    );
}

#[tokio::test]
async fn catalog_refresh_picks_up_rule_changes() {
    let h = harness().await;
    assert!(h.manager.catalog().get_framework("sglang").await.is_none());

    h.config_store
        .put(
            "training.log.parser.framework.sglang",
            r#"{"name": "sglang", "type": "inference", "priority": 7}"#,
        )
        .await;
    h.manager.catalog().refresh_cache().await;

    let rule = h
        .manager
        .catalog()
        .get_framework("sglang")
        .await
        .expect("sglang after refresh");
    assert!(rule.is_inference());

    let mut inference = h.manager.catalog().list_inference_frameworks().await;
    inference.sort();
    assert_eq!(inference, vec!["sglang", "vllm"]);
}

#[tokio::test]
async fn unknown_framework_layers_default_to_runtime() {
    let h = harness().await;
    let info = h.manager.layer_resolver().resolve("not-a-framework").await;
    assert_eq!(info.layer.as_str(), "runtime");
    assert_eq!(info.priority, 1);
}
