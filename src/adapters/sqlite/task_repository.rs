//! SQLite implementation of the task sink.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::adapters::sqlite::parse_timestamp;
use crate::domain::errors::{DetectionError, DetectionResult};
use crate::domain::models::{DetectionTask, DetectionTaskStatus, DetectionTaskType};
use crate::domain::ports::TaskRepository;

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    workload_uid: String,
    task_type: String,
    status: String,
    priority: i64,
    extensions: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for DetectionTask {
    type Error = DetectionError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let task_type = DetectionTaskType::from_str(&row.task_type).ok_or_else(|| {
            DetectionError::Serialization(format!("bad task type '{}'", row.task_type))
        })?;
        let status = DetectionTaskStatus::from_str(&row.status).ok_or_else(|| {
            DetectionError::Serialization(format!("bad task status '{}'", row.status))
        })?;

        Ok(DetectionTask {
            workload_uid: row.workload_uid,
            task_type,
            status,
            priority: row.priority as u32,
            extensions: serde_json::from_str(&row.extensions)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn upsert(&self, task: &DetectionTask) -> DetectionResult<()> {
        let extensions_json = serde_json::to_string(&task.extensions)?;
        // created_at is preserved on conflict: the first upsert wins it.
        sqlx::query(
            r"INSERT INTO detection_tasks
              (workload_uid, task_type, status, priority, extensions, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(workload_uid, task_type) DO UPDATE SET
                status = excluded.status,
                priority = excluded.priority,
                extensions = excluded.extensions,
                updated_at = excluded.updated_at",
        )
        .bind(&task.workload_uid)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(i64::from(task.priority))
        .bind(&extensions_json)
        .bind(task.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
    ) -> DetectionResult<Option<DetectionTask>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM detection_tasks WHERE workload_uid = ? AND task_type = ?",
        )
        .bind(workload_uid)
        .bind(task_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_workload(&self, workload_uid: &str) -> DetectionResult<Vec<DetectionTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM detection_tasks WHERE workload_uid = ? ORDER BY task_type",
        )
        .bind(workload_uid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(
        &self,
        workload_uid: &str,
        task_type: DetectionTaskType,
        status: DetectionTaskStatus,
    ) -> DetectionResult<()> {
        sqlx::query(
            "UPDATE detection_tasks SET status = ?, updated_at = ?
             WHERE workload_uid = ? AND task_type = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(workload_uid)
        .bind(task_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
