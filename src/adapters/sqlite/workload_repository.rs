//! SQLite implementation of the workload lookup facade.
//!
//! The tables mirror what the surrounding shell syncs from the cluster
//! inventory; the core only reads them.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_timestamp, parse_timestamp_opt};
use crate::domain::errors::{DetectionError, DetectionResult};
use crate::domain::models::{PodInfo, PodPhase, WorkloadRef, WorkloadStatus};
use crate::domain::ports::WorkloadRepository;

#[derive(Clone)]
pub struct SqliteWorkloadRepository {
    pool: SqlitePool,
}

impl SqliteWorkloadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Sync one workload row from the cluster inventory.
    pub async fn upsert_workload(&self, workload: &WorkloadRef) -> DetectionResult<()> {
        sqlx::query(
            r"INSERT INTO workloads (uid, name, parent_uid, status, created_at)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(uid) DO UPDATE SET
                name = excluded.name,
                parent_uid = excluded.parent_uid,
                status = excluded.status",
        )
        .bind(&workload.uid)
        .bind(&workload.name)
        .bind(&workload.parent_uid)
        .bind(workload.status.as_str())
        .bind(workload.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sync one pod row from the cluster inventory.
    pub async fn upsert_pod(&self, workload_uid: &str, pod: &PodInfo) -> DetectionResult<()> {
        sqlx::query(
            r"INSERT INTO pods (workload_uid, name, ip, phase, started_at)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(workload_uid, name) DO UPDATE SET
                ip = excluded.ip,
                phase = excluded.phase,
                started_at = excluded.started_at",
        )
        .bind(workload_uid)
        .bind(&pod.name)
        .bind(&pod.ip)
        .bind(pod.phase.as_str())
        .bind(pod.started_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WorkloadRow {
    uid: String,
    name: String,
    parent_uid: Option<String>,
    status: String,
    created_at: String,
}

impl TryFrom<WorkloadRow> for WorkloadRef {
    type Error = DetectionError;

    fn try_from(row: WorkloadRow) -> Result<Self, Self::Error> {
        let status = WorkloadStatus::from_str(&row.status).ok_or_else(|| {
            DetectionError::Serialization(format!("bad workload status '{}'", row.status))
        })?;
        Ok(WorkloadRef {
            uid: row.uid,
            name: row.name,
            parent_uid: row.parent_uid,
            status,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PodRow {
    name: String,
    ip: String,
    phase: String,
    started_at: Option<String>,
}

impl TryFrom<PodRow> for PodInfo {
    type Error = DetectionError;

    fn try_from(row: PodRow) -> Result<Self, Self::Error> {
        let phase = PodPhase::from_str(&row.phase)
            .ok_or_else(|| DetectionError::Serialization(format!("bad pod phase '{}'", row.phase)))?;
        Ok(PodInfo {
            name: row.name,
            ip: row.ip,
            phase,
            started_at: parse_timestamp_opt(row.started_at.as_deref())?,
        })
    }
}

#[async_trait]
impl WorkloadRepository for SqliteWorkloadRepository {
    async fn get(&self, uid: &str) -> DetectionResult<Option<WorkloadRef>> {
        let row: Option<WorkloadRow> = sqlx::query_as("SELECT * FROM workloads WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_root_by_status(
        &self,
        statuses: &[WorkloadStatus],
        limit: usize,
    ) -> DetectionResult<Vec<WorkloadRef>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM workloads
             WHERE (parent_uid IS NULL OR parent_uid = '') AND status IN ({placeholders})
             ORDER BY created_at LIMIT ?"
        );
        let mut query = sqlx::query_as::<_, WorkloadRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn children(&self, uid: &str) -> DetectionResult<Vec<WorkloadRef>> {
        let rows: Vec<WorkloadRow> =
            sqlx::query_as("SELECT * FROM workloads WHERE parent_uid = ? ORDER BY created_at")
                .bind(uid)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn pods(&self, uid: &str) -> DetectionResult<Vec<PodInfo>> {
        let rows: Vec<PodRow> = sqlx::query_as(
            "SELECT name, ip, phase, started_at FROM pods WHERE workload_uid = ? ORDER BY name",
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
