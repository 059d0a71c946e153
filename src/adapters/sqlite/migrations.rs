//! Embedded schema migrations for the detection tables.

use sqlx::SqlitePool;

use crate::domain::errors::DetectionResult;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS detection_evidence (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workload_uid TEXT NOT NULL,
    source TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    framework TEXT NOT NULL,
    frameworks TEXT NOT NULL,
    workload_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    layer TEXT,
    wrapper_framework TEXT,
    base_framework TEXT,
    payload TEXT NOT NULL,
    extra TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    detected_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    UNIQUE (workload_uid, source, framework)
);
CREATE INDEX IF NOT EXISTS idx_evidence_workload
    ON detection_evidence(workload_uid, processed);
CREATE INDEX IF NOT EXISTS idx_evidence_expiry
    ON detection_evidence(expires_at);

CREATE TABLE IF NOT EXISTS framework_detections (
    workload_uid TEXT PRIMARY KEY,
    framework TEXT NOT NULL,
    frameworks TEXT NOT NULL,
    workload_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    status TEXT NOT NULL,
    layer TEXT,
    wrapper_framework TEXT,
    base_framework TEXT,
    evidence_count INTEGER NOT NULL,
    sources TEXT NOT NULL,
    conflicts TEXT NOT NULL,
    lifecycle TEXT NOT NULL,
    confirmed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detections_status
    ON framework_detections(status);

CREATE TABLE IF NOT EXISTS detection_tasks (
    workload_uid TEXT NOT NULL,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    extensions TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (workload_uid, task_type)
);

CREATE TABLE IF NOT EXISTS workloads (
    uid TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    parent_uid TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_workloads_parent ON workloads(parent_uid);

CREATE TABLE IF NOT EXISTS pods (
    workload_uid TEXT NOT NULL,
    name TEXT NOT NULL,
    ip TEXT NOT NULL DEFAULT '',
    phase TEXT NOT NULL,
    started_at TEXT,
    PRIMARY KEY (workload_uid, name)
);

CREATE TABLE IF NOT EXISTS config_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Create every detection table. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DetectionResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
