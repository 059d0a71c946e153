//! Detection-driven task orchestration.
//!
//! Translates detection state transitions into idempotent follow-up task
//! upserts: metadata collection and early-trigger profiler capture for
//! training workloads, metrics scraping for inference workloads, and
//! detection-coordinator bootstrap for workloads with no classification
//! yet. A periodic scanner recovers workloads the event path missed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    DetectionEvent, DetectionEventKind, DetectionRecord, DetectionTask, DetectionTaskType,
    EvidenceRecord, FrameworkRule, PodInfo, WorkloadRef, WorkloadStatus, WorkloadType,
};
use crate::domain::ports::{
    DetectionRepository, EvidenceRepository, TaskRepository, WorkloadRepository,
};
use crate::services::event_bus::DetectionListener;
use crate::services::rule_catalog::RuleCatalog;

// Profiler capture parameters (early trigger).
const PROFILER_PRIORITY: u32 = 50;
const PROFILER_TIMEOUT_SECS: u64 = 600;
const PROFILER_INTERVAL_SECS: u64 = 300;
const PROFILER_MAX_FILE_BYTES: u64 = 1 << 30;

// Metadata collection parameters.
const METADATA_PRIORITY: u32 = 100;
const METADATA_TIMEOUT_SECS: u64 = 30;

// Inference metrics scraping.
const SCRAPE_INTERVAL_SECS: u64 = 15;
const DEFAULT_METRICS_PORT: u16 = 8000;
const DEFAULT_METRICS_PATH: &str = "/metrics";

// Detection coordinator bootstrap context.
const COORDINATOR_INITIAL_STATE: &str = "init";
const COORDINATOR_INITIAL_DELAY_SECS: u64 = 30;
const COORDINATOR_MIN_POD_AGE_SECS: u64 = 30;
const COORDINATOR_CONFIRM_THRESHOLD: f64 = 0.70;
const COORDINATOR_SUBTASK_TIMEOUT_SECS: u64 = 60;

/// Scanner batch cap per run.
const SCAN_BATCH_LIMIT: usize = 100;

/// Frameworks treated as PyTorch-based for profiler purposes. Megatron
/// builds on PyTorch, so it triggers the same capture path.
const PYTORCH_SYNONYMS: [&str; 3] = ["pytorch", "torch", "megatron"];

fn is_pytorch_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    PYTORCH_SYNONYMS.iter().any(|s| lower.contains(s))
}

/// Outcome of one recovery scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub created: usize,
    pub failed: usize,
}

/// Creates follow-up tasks from detection state.
pub struct TaskOrchestrator {
    detections: Arc<dyn DetectionRepository>,
    evidence: Arc<dyn EvidenceRepository>,
    tasks: Arc<dyn TaskRepository>,
    workloads: Arc<dyn WorkloadRepository>,
    catalog: Arc<RuleCatalog>,
    auto_create_task: bool,
}

impl TaskOrchestrator {
    pub fn new(
        detections: Arc<dyn DetectionRepository>,
        evidence: Arc<dyn EvidenceRepository>,
        tasks: Arc<dyn TaskRepository>,
        workloads: Arc<dyn WorkloadRepository>,
        catalog: Arc<RuleCatalog>,
    ) -> Self {
        Self {
            detections,
            evidence,
            tasks,
            workloads,
            catalog,
            auto_create_task: true,
        }
    }

    pub fn with_auto_create(mut self, auto_create_task: bool) -> Self {
        self.auto_create_task = auto_create_task;
        self
    }

    /// Apply the decision procedure to one detection snapshot.
    pub async fn handle_detection(&self, detection: &DetectionRecord) -> DetectionResult<()> {
        if !self.auto_create_task {
            return Ok(());
        }

        let evidence = self
            .evidence
            .list_by_workload(&detection.workload_uid)
            .await?;
        let workload_type = determine_workload_type(detection, &evidence);

        match workload_type {
            WorkloadType::Inference => self.handle_inference(detection, &evidence).await,
            _ => self.handle_training(detection, &evidence).await,
        }
    }

    /// Inference branch: a settled detection gets a metrics-scrape task
    /// pointed at the workload's serving endpoint.
    async fn handle_inference(
        &self,
        detection: &DetectionRecord,
        evidence: &[EvidenceRecord],
    ) -> DetectionResult<()> {
        if !detection.status.is_settled() {
            return Ok(());
        }

        let Some(framework) = primary_inference_framework(detection, evidence) else {
            tracing::warn!(
                workload_uid = %detection.workload_uid,
                "inference detection names no framework; skipping scrape task"
            );
            return Ok(());
        };

        let Some(pod) = self.resolve_pod(&detection.workload_uid).await? else {
            tracing::warn!(
                workload_uid = %detection.workload_uid,
                "no pods found for inference workload; skipping scrape task"
            );
            return Ok(());
        };

        let rule = self.catalog.load_framework(&framework).await.ok();
        let (port, path) = resolve_metrics_endpoint(rule.as_deref());

        let task = DetectionTask::new(
            &detection.workload_uid,
            DetectionTaskType::InferenceMetricsScrape,
            0,
        )
        .with_extension("framework", json!(framework))
        .with_extension("pod_name", json!(pod.name))
        .with_extension("pod_ip", json!(pod.ip))
        .with_extension("port", json!(port))
        .with_extension("path", json!(path))
        .with_extension("scrape_interval_secs", json!(SCRAPE_INTERVAL_SECS))
        .with_extension(
            "labels",
            json!({
                "framework": framework,
                "workload_uid": detection.workload_uid,
            }),
        );

        self.tasks.upsert(&task).await?;
        tracing::info!(
            workload_uid = %detection.workload_uid,
            framework,
            pod_ip = %task.extension_str("pod_ip").unwrap_or_default(),
            port,
            "inference metrics scrape task upserted"
        );
        Ok(())
    }

    /// Training branch: early-trigger profiler for PyTorch-based stacks
    /// regardless of status, then metadata collection once settled.
    async fn handle_training(
        &self,
        detection: &DetectionRecord,
        evidence: &[EvidenceRecord],
    ) -> DetectionResult<()> {
        if implicates_pytorch(detection, evidence) {
            // A profiler failure must not block metadata collection.
            if let Err(e) = self.upsert_profiler_task(detection).await {
                tracing::warn!(
                    workload_uid = %detection.workload_uid,
                    error = %e,
                    "failed to upsert profiler task"
                );
            }
        }

        if detection.status.is_settled() {
            self.upsert_metadata_task(detection).await?;
        }
        Ok(())
    }

    async fn upsert_profiler_task(&self, detection: &DetectionRecord) -> DetectionResult<()> {
        let task = DetectionTask::new(
            &detection.workload_uid,
            DetectionTaskType::ProfilerCollection,
            PROFILER_PRIORITY,
        )
        .with_extension("timeout_secs", json!(PROFILER_TIMEOUT_SECS))
        .with_extension("collection_interval_secs", json!(PROFILER_INTERVAL_SECS))
        .with_extension("max_file_size_bytes", json!(PROFILER_MAX_FILE_BYTES))
        // 0 = unlimited executions.
        .with_extension("max_executions", json!(0))
        .with_extension("early_trigger", json!(true));

        self.tasks.upsert(&task).await?;
        tracing::info!(
            workload_uid = %detection.workload_uid,
            "profiler collection task upserted (early trigger)"
        );
        Ok(())
    }

    async fn upsert_metadata_task(&self, detection: &DetectionRecord) -> DetectionResult<()> {
        let task = DetectionTask::new(
            &detection.workload_uid,
            DetectionTaskType::MetadataCollection,
            METADATA_PRIORITY,
        )
        .with_extension("timeout_secs", json!(METADATA_TIMEOUT_SECS))
        .with_extension("include_tensorboard", json!(true))
        .with_extension("include_metrics", json!(true))
        .with_extension("frameworks", json!(detection.frameworks))
        .with_extension("confidence", json!(detection.confidence));

        self.tasks.upsert(&task).await?;
        tracing::info!(
            workload_uid = %detection.workload_uid,
            framework = %detection.framework,
            "metadata collection task upserted"
        );
        Ok(())
    }

    /// Bootstrap detection coordination for a workload, unless a
    /// coordinator task already exists and is still pending or running.
    /// Returns whether a task was created.
    pub async fn create_detection_coordinator_task(
        &self,
        workload_uid: &str,
    ) -> DetectionResult<bool> {
        if let Some(existing) = self
            .tasks
            .get(workload_uid, DetectionTaskType::DetectionCoordinator)
            .await?
        {
            if existing.status.is_active() {
                return Ok(false);
            }
        }

        let task = DetectionTask::new(workload_uid, DetectionTaskType::DetectionCoordinator, 0)
            .with_extension("state", json!(COORDINATOR_INITIAL_STATE))
            .with_extension("initial_delay_secs", json!(COORDINATOR_INITIAL_DELAY_SECS))
            .with_extension("min_pod_age_secs", json!(COORDINATOR_MIN_POD_AGE_SECS))
            .with_extension("confirm_threshold", json!(COORDINATOR_CONFIRM_THRESHOLD))
            .with_extension(
                "subtask_timeout_secs",
                json!(COORDINATOR_SUBTASK_TIMEOUT_SECS),
            )
            .with_extension("attempts", json!(0));

        self.tasks.upsert(&task).await?;
        tracing::info!(workload_uid, "detection coordinator task created");
        Ok(true)
    }

    /// Recovery scan: bootstrap coordination for running or pending root
    /// workloads with no coordinator task and no usable detection yet.
    pub async fn scan_for_undetected_workloads(&self) -> DetectionResult<ScanReport> {
        let workloads = self
            .workloads
            .list_root_by_status(
                &[WorkloadStatus::Running, WorkloadStatus::Pending],
                SCAN_BATCH_LIMIT,
            )
            .await?;

        let mut report = ScanReport {
            scanned: workloads.len(),
            ..Default::default()
        };

        for workload in workloads {
            match self.needs_bootstrap(&workload).await {
                Ok(false) => {}
                Ok(true) => match self.create_detection_coordinator_task(&workload.uid).await {
                    Ok(true) => report.created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            workload_uid = %workload.uid,
                            error = %e,
                            "coordinator bootstrap failed"
                        );
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        workload_uid = %workload.uid,
                        error = %e,
                        "scan lookup failed"
                    );
                }
            }
        }

        if report.created > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                created = report.created,
                failed = report.failed,
                "undetected workload scan complete"
            );
        }
        Ok(report)
    }

    async fn needs_bootstrap(&self, workload: &WorkloadRef) -> DetectionResult<bool> {
        if self
            .tasks
            .get(&workload.uid, DetectionTaskType::DetectionCoordinator)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        let detection = self.detections.get(&workload.uid).await?;
        Ok(match detection {
            None => true,
            Some(record) => record.status == crate::domain::models::DetectionStatus::Unknown,
        })
    }

    /// Find a scrape target: the workload's own pods, else breadth-first
    /// through children. Prefer a running pod with an address; fall back
    /// to the first pod seen.
    async fn resolve_pod(&self, workload_uid: &str) -> DetectionResult<Option<PodInfo>> {
        let mut queue = std::collections::VecDeque::from([workload_uid.to_string()]);
        while let Some(uid) = queue.pop_front() {
            let pods = self.workloads.pods(&uid).await?;
            if !pods.is_empty() {
                let preferred = pods.iter().find(|p| p.is_reachable()).cloned();
                return Ok(preferred.or_else(|| pods.into_iter().next()));
            }
            for child in self.workloads.children(&uid).await? {
                queue.push_back(child.uid);
            }
        }
        Ok(None)
    }
}

/// Workload type per the decision procedure: the detection's explicit type
/// wins; otherwise inference only when some source says inference and no
/// source says training (an untyped source counts as training).
fn determine_workload_type(
    detection: &DetectionRecord,
    evidence: &[EvidenceRecord],
) -> WorkloadType {
    match detection.workload_type {
        WorkloadType::Inference => return WorkloadType::Inference,
        WorkloadType::Training => return WorkloadType::Training,
        WorkloadType::Unknown => {}
    }

    let mut saw_inference = false;
    let mut saw_training = false;
    for record in evidence {
        match record.workload_type {
            WorkloadType::Inference => saw_inference = true,
            WorkloadType::Training | WorkloadType::Unknown => saw_training = true,
        }
    }
    if saw_inference && !saw_training {
        WorkloadType::Inference
    } else {
        WorkloadType::Training
    }
}

/// Primary serving framework: the detection's ranked list when the
/// detection itself is inference-typed, else the first inference-typed
/// evidence record's strongest framework.
fn primary_inference_framework(
    detection: &DetectionRecord,
    evidence: &[EvidenceRecord],
) -> Option<String> {
    if detection.workload_type == WorkloadType::Inference {
        if let Some(first) = detection.frameworks.first() {
            return Some(first.clone());
        }
        if !detection.framework.is_empty() {
            return Some(detection.framework.clone());
        }
    }
    evidence
        .iter()
        .find(|r| r.workload_type == WorkloadType::Inference)
        .map(|r| {
            r.frameworks
                .first()
                .cloned()
                .unwrap_or_else(|| r.framework.clone())
        })
}

/// Whether the detection implicates a PyTorch-based stack, checking the
/// ranked framework list and every source's framework list.
fn implicates_pytorch(detection: &DetectionRecord, evidence: &[EvidenceRecord]) -> bool {
    if is_pytorch_name(&detection.framework) {
        return true;
    }
    if detection.frameworks.iter().any(|f| is_pytorch_name(f)) {
        return true;
    }
    evidence.iter().any(|record| {
        is_pytorch_name(&record.framework) || record.frameworks.iter().any(|f| is_pytorch_name(f))
    })
}

/// Scrape endpoint from the rule: `metrics_port` extension, then
/// `default_port`, then the first inference port, then 8000. The path is
/// always `/metrics`.
fn resolve_metrics_endpoint(rule: Option<&FrameworkRule>) -> (u16, String) {
    let port = rule
        .and_then(|r| {
            r.extension("metrics_port")
                .or_else(|| r.extension("default_port"))
                .and_then(|v| v.parse::<u16>().ok())
        })
        .or_else(|| {
            rule.and_then(|r| r.inference.as_ref())
                .and_then(|inf| inf.ports.first().copied())
        })
        .unwrap_or(DEFAULT_METRICS_PORT);
    (port, DEFAULT_METRICS_PATH.to_string())
}

/// Event-bus adapter: feeds updated/completed snapshots into the
/// orchestrator's decision procedure.
pub struct TaskOrchestratorListener {
    orchestrator: Arc<TaskOrchestrator>,
}

impl TaskOrchestratorListener {
    pub fn new(orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl DetectionListener for TaskOrchestratorListener {
    fn name(&self) -> &str {
        "task-orchestrator"
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
        self.orchestrator.handle_detection(detection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::adapters::memory::{
        InMemoryConfigStore, InMemoryDetectionRepository, InMemoryEvidenceRepository,
        InMemoryTaskRepository, InMemoryWorkloadRepository,
    };
    use crate::domain::models::{
        AggregationResult, DetectionStatus, DetectionTaskStatus, EvidencePayload, EvidenceSource,
        PodPhase, SourceKind,
    };
    use crate::services::rule_catalog::FRAMEWORK_KEY_PREFIX;

    struct Fixture {
        evidence: Arc<InMemoryEvidenceRepository>,
        detections: Arc<InMemoryDetectionRepository>,
        tasks: Arc<InMemoryTaskRepository>,
        workloads: Arc<InMemoryWorkloadRepository>,
        orchestrator: TaskOrchestrator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryConfigStore::default());
        store
            .put(
                &format!("{FRAMEWORK_KEY_PREFIX}vllm"),
                r#"{"name": "vllm", "type": "inference", "inference": {"ports": [8000]}}"#,
            )
            .await;
        let catalog = Arc::new(RuleCatalog::new(store));

        let evidence = Arc::new(InMemoryEvidenceRepository::default());
        let detections = Arc::new(InMemoryDetectionRepository::default());
        let tasks = Arc::new(InMemoryTaskRepository::default());
        let workloads = Arc::new(InMemoryWorkloadRepository::default());
        let orchestrator = TaskOrchestrator::new(
            detections.clone(),
            evidence.clone(),
            tasks.clone(),
            workloads.clone(),
            catalog,
        );
        Fixture {
            evidence,
            detections,
            tasks,
            workloads,
            orchestrator,
        }
    }

    fn detection(
        workload: &str,
        frameworks: &[&str],
        workload_type: WorkloadType,
        status: DetectionStatus,
    ) -> DetectionRecord {
        let mut result = AggregationResult::unknown(workload);
        result.framework = frameworks.first().map(ToString::to_string).unwrap_or_default();
        result.frameworks = frameworks.iter().map(ToString::to_string).collect();
        result.workload_type = workload_type;
        result.confidence = 0.9;
        result.status = status;
        DetectionRecord::from_result(&result, Utc::now())
    }

    fn inference_evidence(workload: &str, framework: &str) -> EvidenceRecord {
        let now = Utc::now();
        EvidenceRecord {
            id: 0,
            workload_uid: workload.to_string(),
            source: EvidenceSource::ActiveDetection,
            source_kind: SourceKind::Active,
            framework: framework.to_string(),
            frameworks: vec![framework.to_string()],
            workload_type: WorkloadType::Inference,
            confidence: 0.9,
            layer: None,
            wrapper_framework: None,
            base_framework: None,
            payload: EvidencePayload::Generic {},
            extra: serde_json::Map::new(),
            processed: false,
            detected_at: now,
            created_at: now,
            expires_at: None,
        }
    }

    fn running_pod(name: &str, ip: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            ip: ip.to_string(),
            phase: PodPhase::Running,
            started_at: Some(Utc::now()),
        }
    }

    fn workload(uid: &str, parent: Option<&str>, status: WorkloadStatus) -> WorkloadRef {
        WorkloadRef {
            uid: uid.to_string(),
            name: format!("wl-{uid}"),
            parent_uid: parent.map(ToString::to_string),
            status,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_megatron_triggers_profiler_and_metadata() {
        let f = fixture().await;
        let det = detection(
            "w-1",
            &["megatron"],
            WorkloadType::Training,
            DetectionStatus::Confirmed,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        let profiler = f
            .tasks
            .get("w-1", DetectionTaskType::ProfilerCollection)
            .await
            .unwrap()
            .expect("profiler task");
        assert_eq!(profiler.priority, PROFILER_PRIORITY);
        assert_eq!(profiler.extensions["early_trigger"], json!(true));

        let metadata = f
            .tasks
            .get("w-1", DetectionTaskType::MetadataCollection)
            .await
            .unwrap()
            .expect("metadata task");
        assert_eq!(metadata.priority, METADATA_PRIORITY);
        assert_eq!(metadata.extensions["include_tensorboard"], json!(true));
    }

    #[tokio::test]
    async fn test_profiler_fires_before_confirmation() {
        let f = fixture().await;
        let det = detection(
            "w-1",
            &["pytorch"],
            WorkloadType::Training,
            DetectionStatus::Suspected,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::ProfilerCollection)
            .await
            .unwrap()
            .is_some());
        // Metadata waits for confirmation.
        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::MetadataCollection)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_non_pytorch_training_gets_no_profiler() {
        let f = fixture().await;
        let det = detection(
            "w-1",
            &["jax"],
            WorkloadType::Training,
            DetectionStatus::Confirmed,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::ProfilerCollection)
            .await
            .unwrap()
            .is_none());
        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::MetadataCollection)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_inference_scrape_task_with_pod_endpoint() {
        let f = fixture().await;
        f.workloads
            .add_workload(workload("w-1", None, WorkloadStatus::Running))
            .await;
        f.workloads
            .add_pod("w-1", running_pod("serve-0", "10.0.0.5"))
            .await;

        let det = detection(
            "w-1",
            &["vllm"],
            WorkloadType::Inference,
            DetectionStatus::Confirmed,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        let task = f
            .tasks
            .get("w-1", DetectionTaskType::InferenceMetricsScrape)
            .await
            .unwrap()
            .expect("scrape task");
        assert_eq!(task.extensions["pod_ip"], json!("10.0.0.5"));
        assert_eq!(task.extensions["port"], json!(8000));
        assert_eq!(task.extensions["path"], json!("/metrics"));
        assert_eq!(task.extensions["scrape_interval_secs"], json!(15));
    }

    #[tokio::test]
    async fn test_pod_resolution_recurses_into_children() {
        let f = fixture().await;
        f.workloads
            .add_workload(workload("parent", None, WorkloadStatus::Running))
            .await;
        f.workloads
            .add_workload(workload("child", Some("parent"), WorkloadStatus::Running))
            .await;
        f.workloads
            .add_pod("child", running_pod("serve-0", "10.0.0.9"))
            .await;

        let det = detection(
            "parent",
            &["vllm"],
            WorkloadType::Inference,
            DetectionStatus::Verified,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        let task = f
            .tasks
            .get("parent", DetectionTaskType::InferenceMetricsScrape)
            .await
            .unwrap()
            .expect("scrape task");
        assert_eq!(task.extensions["pod_ip"], json!("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_unsettled_inference_detection_creates_nothing() {
        let f = fixture().await;
        let det = detection(
            "w-1",
            &["vllm"],
            WorkloadType::Inference,
            DetectionStatus::Suspected,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();
        assert!(f.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_workload_type_inferred_from_sources() {
        let f = fixture().await;
        f.evidence
            .create(&inference_evidence("w-1", "vllm"))
            .await
            .unwrap();
        f.workloads
            .add_workload(workload("w-1", None, WorkloadStatus::Running))
            .await;
        f.workloads
            .add_pod("w-1", running_pod("serve-0", "10.0.0.5"))
            .await;

        // Detection itself is untyped; the lone inference source decides.
        let det = detection(
            "w-1",
            &["vllm"],
            WorkloadType::Unknown,
            DetectionStatus::Confirmed,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();

        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::InferenceMetricsScrape)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_upserts_are_idempotent() {
        let f = fixture().await;
        let det = detection(
            "w-1",
            &["pytorch"],
            WorkloadType::Training,
            DetectionStatus::Confirmed,
        );
        f.orchestrator.handle_detection(&det).await.unwrap();
        f.orchestrator.handle_detection(&det).await.unwrap();

        // One profiler + one metadata, not two of each.
        assert_eq!(f.tasks.len().await, 2);
    }

    #[tokio::test]
    async fn test_auto_create_off_does_nothing() {
        let f = fixture().await;
        let orchestrator = TaskOrchestrator::new(
            f.detections.clone(),
            f.evidence.clone(),
            f.tasks.clone(),
            f.workloads.clone(),
            Arc::new(RuleCatalog::new(Arc::new(InMemoryConfigStore::default()))),
        )
        .with_auto_create(false);

        let det = detection(
            "w-1",
            &["pytorch"],
            WorkloadType::Training,
            DetectionStatus::Verified,
        );
        orchestrator.handle_detection(&det).await.unwrap();
        assert!(f.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_coordinator_bootstrap_skips_active_task() {
        let f = fixture().await;
        assert!(f
            .orchestrator
            .create_detection_coordinator_task("w-1")
            .await
            .unwrap());

        // Second call: the pending coordinator blocks recreation.
        assert!(!f
            .orchestrator
            .create_detection_coordinator_task("w-1")
            .await
            .unwrap());

        // A finished coordinator can be replaced.
        f.tasks
            .update_status(
                "w-1",
                DetectionTaskType::DetectionCoordinator,
                DetectionTaskStatus::Completed,
            )
            .await
            .unwrap();
        assert!(f
            .orchestrator
            .create_detection_coordinator_task("w-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_coordinator_context() {
        let f = fixture().await;
        f.orchestrator
            .create_detection_coordinator_task("w-1")
            .await
            .unwrap();

        let task = f
            .tasks
            .get("w-1", DetectionTaskType::DetectionCoordinator)
            .await
            .unwrap()
            .expect("coordinator task");
        assert_eq!(task.extensions["state"], json!("init"));
        assert_eq!(task.extensions["initial_delay_secs"], json!(30));
        assert_eq!(task.extensions["confirm_threshold"], json!(0.70));
        assert_eq!(task.extensions["attempts"], json!(0));
    }

    #[tokio::test]
    async fn test_scan_bootstraps_only_undetected_roots() {
        let f = fixture().await;
        // Root, running, no detection: bootstrapped.
        f.workloads
            .add_workload(workload("w-1", None, WorkloadStatus::Running))
            .await;
        // Child workload: skipped.
        f.workloads
            .add_workload(workload("w-2", Some("w-1"), WorkloadStatus::Running))
            .await;
        // Root with a confirmed detection: skipped.
        f.workloads
            .add_workload(workload("w-3", None, WorkloadStatus::Running))
            .await;
        f.detections
            .create(&detection(
                "w-3",
                &["pytorch"],
                WorkloadType::Training,
                DetectionStatus::Confirmed,
            ))
            .await
            .unwrap();
        // Root with an unknown-status detection: bootstrapped.
        f.workloads
            .add_workload(workload("w-4", None, WorkloadStatus::Pending))
            .await;
        f.detections
            .create(&detection(
                "w-4",
                &[],
                WorkloadType::Unknown,
                DetectionStatus::Unknown,
            ))
            .await
            .unwrap();
        // Succeeded root: out of scope.
        f.workloads
            .add_workload(workload("w-5", None, WorkloadStatus::Succeeded))
            .await;

        let report = f.orchestrator.scan_for_undetected_workloads().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 0);

        assert!(f
            .tasks
            .get("w-1", DetectionTaskType::DetectionCoordinator)
            .await
            .unwrap()
            .is_some());
        assert!(f
            .tasks
            .get("w-4", DetectionTaskType::DetectionCoordinator)
            .await
            .unwrap()
            .is_some());
        assert!(f
            .tasks
            .get("w-3", DetectionTaskType::DetectionCoordinator)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_pytorch_synonyms() {
        assert!(is_pytorch_name("pytorch"));
        assert!(is_pytorch_name("PyTorch-Lightning"));
        assert!(is_pytorch_name("torch"));
        assert!(is_pytorch_name("Megatron-LM"));
        assert!(!is_pytorch_name("jax"));
        assert!(!is_pytorch_name("tensorflow"));
    }

    #[test]
    fn test_metrics_endpoint_resolution_order() {
        // Extension wins.
        let mut rule = FrameworkRule::new("vllm");
        rule.extensions
            .insert("metrics_port".into(), "9090".into());
        assert_eq!(resolve_metrics_endpoint(Some(&rule)).0, 9090);

        // default_port next.
        let mut rule = FrameworkRule::new("vllm");
        rule.extensions.insert("default_port".into(), "8080".into());
        assert_eq!(resolve_metrics_endpoint(Some(&rule)).0, 8080);

        // First inference port next.
        let mut rule = FrameworkRule::new("vllm");
        rule.inference = Some(crate::domain::models::InferencePatterns {
            ports: vec![8000, 8001],
            ..Default::default()
        });
        assert_eq!(resolve_metrics_endpoint(Some(&rule)).0, 8000);

        // Fallback.
        let (port, path) = resolve_metrics_endpoint(None);
        assert_eq!(port, DEFAULT_METRICS_PORT);
        assert_eq!(path, DEFAULT_METRICS_PATH);
    }
}
