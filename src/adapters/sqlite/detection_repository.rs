//! SQLite implementation of the detection state repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_timestamp, parse_timestamp_opt};
use crate::domain::errors::{DetectionError, DetectionResult};
use crate::domain::models::{
    Conflict, DetectionLifecycle, DetectionRecord, DetectionStatus, FrameworkLayer, WorkloadType,
};
use crate::domain::ports::DetectionRepository;

#[derive(Clone)]
pub struct SqliteDetectionRepository {
    pool: SqlitePool,
}

impl SqliteDetectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DetectionRow {
    workload_uid: String,
    framework: String,
    frameworks: String,
    workload_type: String,
    confidence: f64,
    status: String,
    layer: Option<String>,
    wrapper_framework: Option<String>,
    base_framework: Option<String>,
    evidence_count: i64,
    sources: String,
    conflicts: String,
    lifecycle: String,
    confirmed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DetectionRow> for DetectionRecord {
    type Error = DetectionError;

    fn try_from(row: DetectionRow) -> Result<Self, Self::Error> {
        let status = DetectionStatus::from_str(&row.status)
            .ok_or_else(|| DetectionError::Serialization(format!("bad status '{}'", row.status)))?;
        let lifecycle = DetectionLifecycle::from_str(&row.lifecycle).ok_or_else(|| {
            DetectionError::Serialization(format!("bad lifecycle '{}'", row.lifecycle))
        })?;
        let workload_type = WorkloadType::from_str(&row.workload_type).ok_or_else(|| {
            DetectionError::Serialization(format!("bad workload type '{}'", row.workload_type))
        })?;
        let layer = row
            .layer
            .as_deref()
            .map(|l| {
                FrameworkLayer::from_str(l)
                    .ok_or_else(|| DetectionError::Serialization(format!("bad layer '{l}'")))
            })
            .transpose()?;

        let frameworks: Vec<String> = serde_json::from_str(&row.frameworks)?;
        let sources: Vec<String> = serde_json::from_str(&row.sources)?;
        let conflicts: Vec<Conflict> = serde_json::from_str(&row.conflicts)?;

        Ok(DetectionRecord {
            workload_uid: row.workload_uid,
            framework: row.framework,
            frameworks,
            workload_type,
            confidence: row.confidence,
            status,
            layer,
            wrapper_framework: row.wrapper_framework,
            base_framework: row.base_framework,
            evidence_count: row.evidence_count as usize,
            sources,
            conflicts,
            lifecycle,
            confirmed_at: parse_timestamp_opt(row.confirmed_at.as_deref())?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl DetectionRepository for SqliteDetectionRepository {
    async fn get(&self, workload_uid: &str) -> DetectionResult<Option<DetectionRecord>> {
        let row: Option<DetectionRow> =
            sqlx::query_as("SELECT * FROM framework_detections WHERE workload_uid = ?")
                .bind(workload_uid)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn create(&self, record: &DetectionRecord) -> DetectionResult<()> {
        sqlx::query(
            r"INSERT INTO framework_detections
              (workload_uid, framework, frameworks, workload_type, confidence, status,
               layer, wrapper_framework, base_framework, evidence_count, sources,
               conflicts, lifecycle, confirmed_at, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.workload_uid)
        .bind(&record.framework)
        .bind(serde_json::to_string(&record.frameworks)?)
        .bind(record.workload_type.as_str())
        .bind(record.confidence)
        .bind(record.status.as_str())
        .bind(record.layer.map(|l| l.as_str()))
        .bind(&record.wrapper_framework)
        .bind(&record.base_framework)
        .bind(record.evidence_count as i64)
        .bind(serde_json::to_string(&record.sources)?)
        .bind(serde_json::to_string(&record.conflicts)?)
        .bind(record.lifecycle.as_str())
        .bind(record.confirmed_at.map(|t| t.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &DetectionRecord) -> DetectionResult<()> {
        let result = sqlx::query(
            r"UPDATE framework_detections SET
                framework = ?, frameworks = ?, workload_type = ?, confidence = ?,
                status = ?, layer = ?, wrapper_framework = ?, base_framework = ?,
                evidence_count = ?, sources = ?, conflicts = ?, lifecycle = ?,
                confirmed_at = ?, updated_at = ?
              WHERE workload_uid = ?",
        )
        .bind(&record.framework)
        .bind(serde_json::to_string(&record.frameworks)?)
        .bind(record.workload_type.as_str())
        .bind(record.confidence)
        .bind(record.status.as_str())
        .bind(record.layer.map(|l| l.as_str()))
        .bind(&record.wrapper_framework)
        .bind(&record.base_framework)
        .bind(record.evidence_count as i64)
        .bind(serde_json::to_string(&record.sources)?)
        .bind(serde_json::to_string(&record.conflicts)?)
        .bind(record.lifecycle.as_str())
        .bind(record.confirmed_at.map(|t| t.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .bind(&record.workload_uid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DetectionError::WorkloadNotFound(record.workload_uid.clone()));
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: DetectionStatus,
    ) -> DetectionResult<Vec<DetectionRecord>> {
        let rows: Vec<DetectionRow> = sqlx::query_as(
            "SELECT * FROM framework_detections WHERE status = ? ORDER BY workload_uid",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
