//! In-memory implementations of the persistence ports.
//!
//! Used by unit and integration tests, and by embedded deployments that do
//! not need durability. Semantics mirror the SQLite adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    DetectionRecord, DetectionStatus, DetectionTask, DetectionTaskStatus, DetectionTaskType,
    EvidenceRecord, PodInfo, WorkloadRef, WorkloadStatus,
};
use crate::domain::ports::{
    ConfigStore, DetectionRepository, EvidenceRepository, TaskRepository, WorkloadRepository,
};

/// Hierarchical key/value store backed by a map.
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryConfigStore {
    pub async fn put(&self, key: &str, value: &str) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, key: &str) -> DetectionResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> DetectionResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Evidence store backed by a vector.
#[derive(Default)]
pub struct InMemoryEvidenceRepository {
    records: RwLock<Vec<EvidenceRecord>>,
    next_id: AtomicI64,
}

impl InMemoryEvidenceRepository {
    fn assign_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Total record count, for test assertions.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EvidenceRepository for InMemoryEvidenceRepository {
    async fn create(&self, record: &EvidenceRecord) -> DetectionResult<i64> {
        let id = self.assign_id();
        let mut stored = record.clone();
        stored.id = id;
        self.records.write().await.push(stored);
        Ok(id)
    }

    async fn batch_create(&self, records: &[EvidenceRecord]) -> DetectionResult<()> {
        let mut guard = self.records.write().await;
        for record in records {
            let mut stored = record.clone();
            stored.id = self.assign_id();
            guard.push(stored);
        }
        Ok(())
    }

    async fn upsert(&self, record: &EvidenceRecord) -> DetectionResult<()> {
        let mut guard = self.records.write().await;
        if let Some(existing) = guard.iter_mut().find(|r| {
            r.workload_uid == record.workload_uid
                && r.source == record.source
                && r.framework == record.framework
        }) {
            let id = existing.id;
            let created_at = existing.created_at;
            *existing = record.clone();
            existing.id = id;
            existing.created_at = created_at;
            existing.processed = false;
        } else {
            let mut stored = record.clone();
            stored.id = self.assign_id();
            guard.push(stored);
        }
        Ok(())
    }

    async fn list_unprocessed(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.workload_uid == workload_uid && !r.processed)
            .cloned()
            .collect())
    }

    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.workload_uid == workload_uid)
            .cloned()
            .collect())
    }

    async fn distinct_sources(&self, workload_uid: &str) -> DetectionResult<Vec<String>> {
        let mut sources: Vec<String> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.workload_uid == workload_uid)
            .map(|r| r.source.as_str().to_string())
            .collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    async fn mark_processed(&self, ids: &[i64]) -> DetectionResult<()> {
        let mut guard = self.records.write().await;
        for record in guard.iter_mut() {
            if ids.contains(&record.id) {
                record.processed = true;
            }
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, batch: usize) -> DetectionResult<u64> {
        let mut guard = self.records.write().await;
        let before = guard.len();
        let mut deleted = 0usize;
        guard.retain(|r| {
            let expired = r.expires_at.is_some_and(|e| e <= now);
            if expired && deleted < batch {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok((before - guard.len()) as u64)
    }

    async fn delete_processed_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> DetectionResult<u64> {
        let mut guard = self.records.write().await;
        let before = guard.len();
        let mut deleted = 0usize;
        guard.retain(|r| {
            let stale = r.processed && r.created_at <= cutoff;
            if stale && deleted < batch {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok((before - guard.len()) as u64)
    }

    async fn prune_per_workload(&self, max_per_workload: usize) -> DetectionResult<u64> {
        let mut guard = self.records.write().await;
        let mut per_workload: HashMap<String, Vec<i64>> = HashMap::new();
        for record in guard.iter() {
            per_workload
                .entry(record.workload_uid.clone())
                .or_default()
                .push(record.id);
        }

        let mut victims: Vec<i64> = Vec::new();
        for ids in per_workload.values_mut() {
            if ids.len() > max_per_workload {
                // Oldest first by insertion order; keep the newest N.
                let excess = ids.len() - max_per_workload;
                victims.extend(ids.iter().take(excess));
            }
        }

        let before = guard.len();
        guard.retain(|r| !victims.contains(&r.id));
        Ok((before - guard.len()) as u64)
    }
}

/// Detection state store backed by a map.
#[derive(Default)]
pub struct InMemoryDetectionRepository {
    records: RwLock<HashMap<String, DetectionRecord>>,
}

#[async_trait]
impl DetectionRepository for InMemoryDetectionRepository {
    async fn get(&self, workload_uid: &str) -> DetectionResult<Option<DetectionRecord>> {
        Ok(self.records.read().await.get(workload_uid).cloned())
    }

    async fn create(&self, record: &DetectionRecord) -> DetectionResult<()> {
        self.records
            .write()
            .await
            .insert(record.workload_uid.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &DetectionRecord) -> DetectionResult<()> {
        self.records
            .write()
            .await
            .insert(record.workload_uid.clone(), record.clone());
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: DetectionStatus,
    ) -> DetectionResult<Vec<DetectionRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}

/// Task sink backed by a map keyed on (workload uid, task type).
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<(String, DetectionTaskType), DetectionTask>>,
}

impl InMemoryTaskRepository {
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn upsert(&self, task: &DetectionTask) -> DetectionResult<()> {
        let key = (task.workload_uid.clone(), task.task_type);
        let mut guard = self.tasks.write().await;
        if let Some(existing) = guard.get_mut(&key) {
            let created_at = existing.created_at;
            *existing = task.clone();
            existing.created_at = created_at;
            existing.updated_at = Utc::now();
        } else {
            guard.insert(key, task.clone());
        }
        Ok(())
    }

    async fn get(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
    ) -> DetectionResult<Option<DetectionTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&(workload_uid.to_string(), task_type))
            .cloned())
    }

    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<DetectionTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.workload_uid == workload_uid)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
        status: DetectionTaskStatus,
    ) -> DetectionResult<()> {
        let mut guard = self.tasks.write().await;
        if let Some(task) = guard.get_mut(&(workload_uid.to_string(), task_type)) {
            task.status = status;
            task.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Workload inventory backed by maps, with seeding helpers for tests.
#[derive(Default)]
pub struct InMemoryWorkloadRepository {
    workloads: RwLock<HashMap<String, WorkloadRef>>,
    pods: RwLock<HashMap<String, Vec<PodInfo>>>,
}

impl InMemoryWorkloadRepository {
    pub async fn add_workload(&self, workload: WorkloadRef) {
        self.workloads
            .write()
            .await
            .insert(workload.uid.clone(), workload);
    }

    pub async fn add_pod(&self, workload_uid: &str, pod: PodInfo) {
        self.pods
            .write()
            .await
            .entry(workload_uid.to_string())
            .or_default()
            .push(pod);
    }
}

#[async_trait]
impl WorkloadRepository for InMemoryWorkloadRepository {
    async fn get(&self, uid: &str) -> DetectionResult<Option<WorkloadRef>> {
        Ok(self.workloads.read().await.get(uid).cloned())
    }

    async fn list_root_by_status(
        &self,
        statuses: &[WorkloadStatus],
        limit: usize,
    ) -> DetectionResult<Vec<WorkloadRef>> {
        let mut roots: Vec<WorkloadRef> = self
            .workloads
            .read()
            .await
            .values()
            .filter(|w| w.is_root() && statuses.contains(&w.status))
            .cloned()
            .collect();
        roots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        roots.truncate(limit);
        Ok(roots)
    }

    async fn children(&self, uid: &str) -> DetectionResult<Vec<WorkloadRef>> {
        Ok(self
            .workloads
            .read()
            .await
            .values()
            .filter(|w| w.parent_uid.as_deref() == Some(uid))
            .cloned()
            .collect())
    }

    async fn pods(&self, uid: &str) -> DetectionResult<Vec<PodInfo>> {
        Ok(self.pods.read().await.get(uid).cloned().unwrap_or_default())
    }
}
