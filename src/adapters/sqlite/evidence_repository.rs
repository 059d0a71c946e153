//! SQLite implementation of the evidence repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_timestamp, parse_timestamp_opt};
use crate::domain::errors::{DetectionError, DetectionResult};
use crate::domain::models::{
    EvidencePayload, EvidenceRecord, EvidenceSource, FrameworkLayer, SourceKind, WorkloadType,
};
use crate::domain::ports::EvidenceRepository;

#[derive(Clone)]
pub struct SqliteEvidenceRepository {
    pool: SqlitePool,
}

impl SqliteEvidenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: i64,
    workload_uid: String,
    source: String,
    source_kind: String,
    framework: String,
    frameworks: String,
    workload_type: String,
    confidence: f64,
    layer: Option<String>,
    wrapper_framework: Option<String>,
    base_framework: Option<String>,
    payload: String,
    extra: String,
    processed: bool,
    detected_at: String,
    created_at: String,
    expires_at: Option<String>,
}

impl TryFrom<EvidenceRow> for EvidenceRecord {
    type Error = DetectionError;

    fn try_from(row: EvidenceRow) -> Result<Self, Self::Error> {
        let source = EvidenceSource::from_str(&row.source)
            .ok_or_else(|| DetectionError::Serialization(format!("bad source '{}'", row.source)))?;
        let source_kind = SourceKind::from_str(&row.source_kind).ok_or_else(|| {
            DetectionError::Serialization(format!("bad source kind '{}'", row.source_kind))
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

        let payload: EvidencePayload = serde_json::from_str(&row.payload)?;
        let extra: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&row.extra)?;
        let frameworks: Vec<String> = serde_json::from_str(&row.frameworks)?;

        Ok(EvidenceRecord {
            id: row.id,
            workload_uid: row.workload_uid,
            source,
            source_kind,
            framework: row.framework,
            frameworks,
            workload_type,
            confidence: row.confidence,
            layer,
            wrapper_framework: row.wrapper_framework,
            base_framework: row.base_framework,
            payload,
            extra,
            processed: row.processed,
            detected_at: parse_timestamp(&row.detected_at)?,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp_opt(row.expires_at.as_deref())?,
        })
    }
}

#[async_trait]
impl EvidenceRepository for SqliteEvidenceRepository {
    async fn create(&self, record: &EvidenceRecord) -> DetectionResult<i64> {
        let frameworks_json = serde_json::to_string(&record.frameworks)?;
        let payload_json = serde_json::to_string(&record.payload)?;
        let extra_json = serde_json::to_string(&record.extra)?;

        let result = sqlx::query(
            r"INSERT INTO detection_evidence
              (workload_uid, source, source_kind, framework, frameworks, workload_type,
               confidence, layer, wrapper_framework, base_framework, payload, extra,
               processed, detected_at, created_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.workload_uid)
        .bind(record.source.as_str())
        .bind(record.source_kind.as_str())
        .bind(&record.framework)
        .bind(&frameworks_json)
        .bind(record.workload_type.as_str())
        .bind(record.confidence)
        .bind(record.layer.map(|l| l.as_str()))
        .bind(&record.wrapper_framework)
        .bind(&record.base_framework)
        .bind(&payload_json)
        .bind(&extra_json)
        .bind(record.processed)
        .bind(record.detected_at.to_rfc3339())
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn batch_create(&self, records: &[EvidenceRecord]) -> DetectionResult<()> {
        for record in records {
            self.create(record).await?;
        }
        Ok(())
    }

    async fn upsert(&self, record: &EvidenceRecord) -> DetectionResult<()> {
        let frameworks_json = serde_json::to_string(&record.frameworks)?;
        let payload_json = serde_json::to_string(&record.payload)?;
        let extra_json = serde_json::to_string(&record.extra)?;

        sqlx::query(
            r"INSERT INTO detection_evidence
              (workload_uid, source, source_kind, framework, frameworks, workload_type,
               confidence, layer, wrapper_framework, base_framework, payload, extra,
               processed, detected_at, created_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
              ON CONFLICT(workload_uid, source, framework) DO UPDATE SET
                source_kind = excluded.source_kind,
                frameworks = excluded.frameworks,
                workload_type = excluded.workload_type,
                confidence = excluded.confidence,
                layer = excluded.layer,
                wrapper_framework = excluded.wrapper_framework,
                base_framework = excluded.base_framework,
                payload = excluded.payload,
                extra = excluded.extra,
                processed = 0,
                detected_at = excluded.detected_at,
                expires_at = excluded.expires_at",
        )
        .bind(&record.workload_uid)
        .bind(record.source.as_str())
        .bind(record.source_kind.as_str())
        .bind(&record.framework)
        .bind(&frameworks_json)
        .bind(record.workload_type.as_str())
        .bind(record.confidence)
        .bind(record.layer.map(|l| l.as_str()))
        .bind(&record.wrapper_framework)
        .bind(&record.base_framework)
        .bind(&payload_json)
        .bind(&extra_json)
        .bind(record.detected_at.to_rfc3339())
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unprocessed(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>> {
        let rows: Vec<EvidenceRow> = sqlx::query_as(
            "SELECT * FROM detection_evidence
             WHERE workload_uid = ? AND processed = 0 ORDER BY id",
        )
        .bind(workload_uid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<EvidenceRecord>> {
        let rows: Vec<EvidenceRow> = sqlx::query_as(
            "SELECT * FROM detection_evidence WHERE workload_uid = ? ORDER BY id",
        )
        .bind(workload_uid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn distinct_sources(&self, workload_uid: &str) -> DetectionResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT source FROM detection_evidence
             WHERE workload_uid = ? ORDER BY source",
        )
        .bind(workload_uid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(source,)| source).collect())
    }

    async fn mark_processed(&self, ids: &[i64]) -> DetectionResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql =
            format!("UPDATE detection_evidence SET processed = 1 WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, batch: usize) -> DetectionResult<u64> {
        let result = sqlx::query(
            r"DELETE FROM detection_evidence WHERE id IN (
                SELECT id FROM detection_evidence
                WHERE expires_at IS NOT NULL AND expires_at <= ?
                LIMIT ?
              )",
        )
        .bind(now.to_rfc3339())
        .bind(batch as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_processed_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> DetectionResult<u64> {
        let result = sqlx::query(
            r"DELETE FROM detection_evidence WHERE id IN (
                SELECT id FROM detection_evidence
                WHERE processed = 1 AND created_at <= ?
                LIMIT ?
              )",
        )
        .bind(cutoff.to_rfc3339())
        .bind(batch as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prune_per_workload(&self, max_per_workload: usize) -> DetectionResult<u64> {
        // Keep the newest N per workload; ids are monotone.
        let result = sqlx::query(
            r"DELETE FROM detection_evidence WHERE id IN (
                SELECT id FROM detection_evidence AS e
                WHERE (
                    SELECT COUNT(*) FROM detection_evidence AS newer
                    WHERE newer.workload_uid = e.workload_uid AND newer.id > e.id
                ) >= ?
              )",
        )
        .bind(max_per_workload as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
