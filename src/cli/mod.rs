//! Operational command-line shell.
//!
//! The library never reads the environment or prints; everything
//! process-shaped lives here.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};

use crate::adapters::sqlite::{
    create_pool, run_migrations, SqliteConfigStore, SqliteDetectionRepository,
    SqliteEvidenceRepository, SqliteTaskRepository, SqliteWorkloadRepository,
};
use crate::infrastructure::config::SentinelConfig;
use crate::services::detection_manager::{DetectionManager, DetectionManagerConfig};
use crate::services::detection_scanner::{DetectionScanner, ScannerConfig};
use crate::services::evidence_sweeper::{EvidenceSweeper, SweeperConfig};

#[derive(Parser)]
#[command(name = "sentinel", about = "Framework detection engine for AI workloads", version)]
pub struct Cli {
    /// Path to a configuration file (defaults to sentinel.yaml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the detection service (sweeper + recovery scanner).
    Run,
    /// List the framework rules currently in the catalog.
    Frameworks,
    /// Show the detection state for one workload.
    Detection {
        /// Workload uid.
        workload_uid: String,
    },
}

pub fn load_config(cli: &Cli) -> Result<SentinelConfig> {
    match &cli.config {
        Some(path) => SentinelConfig::load_from_file(path),
        None => SentinelConfig::load(),
    }
}

struct Backends {
    config_store: Arc<SqliteConfigStore>,
    evidence: Arc<SqliteEvidenceRepository>,
    detections: Arc<SqliteDetectionRepository>,
    tasks: Arc<SqliteTaskRepository>,
    workloads: Arc<SqliteWorkloadRepository>,
}

async fn open_backends(config: &SentinelConfig) -> Result<Backends> {
    let url = format!("sqlite:{}", config.database.path);
    let pool = create_pool(&url, None)
        .await
        .context("failed to open database")?;
    run_migrations(&pool).await.context("migration failed")?;

    Ok(Backends {
        config_store: Arc::new(SqliteConfigStore::new(pool.clone())),
        evidence: Arc::new(SqliteEvidenceRepository::new(pool.clone())),
        detections: Arc::new(SqliteDetectionRepository::new(pool.clone())),
        tasks: Arc::new(SqliteTaskRepository::new(pool.clone())),
        workloads: Arc::new(SqliteWorkloadRepository::new(pool)),
    })
}

async fn build_manager(config: &SentinelConfig, backends: &Backends) -> Arc<DetectionManager> {
    let manager_config = DetectionManagerConfig {
        auto_create_task: config.detection.auto_create_task,
        weights: config.detection.weights(),
        catalog_ttl: std::time::Duration::from_secs(config.detection.catalog_ttl_secs),
        evidence_expiration: chrono::Duration::days(config.detection.evidence_expiration_days),
        ..Default::default()
    };
    DetectionManager::bootstrap(
        backends.config_store.clone(),
        backends.evidence.clone(),
        backends.detections.clone(),
        backends.tasks.clone(),
        backends.workloads.clone(),
        manager_config,
    )
    .await
}

/// Run the service until interrupted.
pub async fn run_service(config: SentinelConfig) -> Result<()> {
    let backends = open_backends(&config).await?;
    let manager = build_manager(&config, &backends).await;

    let loaded = manager.catalog().load_all().await;
    tracing::info!(frameworks = loaded.len(), "rule catalog loaded");

    let sweeper = EvidenceSweeper::new(
        backends.evidence.clone(),
        SweeperConfig {
            sweep_interval: std::time::Duration::from_secs(config.detection.sweep_interval_secs),
            keep_processed_for: chrono::Duration::days(config.detection.keep_processed_days),
            batch_size: config.detection.cleanup_batch_size,
            max_per_workload: config.detection.max_evidence_per_workload,
            run_on_startup: false,
        },
    );
    let sweeper_handle = sweeper.handle();
    let sweeper_task = tokio::spawn(sweeper.run());

    let scanner = DetectionScanner::new(
        manager.orchestrator().clone(),
        ScannerConfig {
            scan_interval: std::time::Duration::from_secs(config.detection.scan_interval_secs),
            run_on_startup: true,
        },
    );
    let scanner_handle = scanner.handle();
    let scanner_task = tokio::spawn(scanner.run());

    tracing::info!("sentinel detection service running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    sweeper_handle.stop();
    scanner_handle.stop();
    let _ = tokio::join!(sweeper_task, scanner_task);
    Ok(())
}

/// Print the catalog contents as a table.
pub async fn list_frameworks(config: SentinelConfig) -> Result<()> {
    let backends = open_backends(&config).await?;
    let manager = build_manager(&config, &backends).await;
    let rules = manager.catalog().load_all().await;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(["Name", "Type", "Layer", "Priority", "Enabled", "Patterns"]);
    for rule in &rules {
        let pattern_count = rule.identify.len()
            + rule.performance.len()
            + rule.training_events.values().map(Vec::len).sum::<usize>()
            + rule.checkpoint_events.values().map(Vec::len).sum::<usize>();
        table.add_row([
            rule.name.clone(),
            rule.framework_type().as_str().to_string(),
            rule.layer().as_str().to_string(),
            rule.priority.to_string(),
            rule.enabled.to_string(),
            pattern_count.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Print the detection state for one workload.
pub async fn show_detection(config: SentinelConfig, workload_uid: &str) -> Result<()> {
    let backends = open_backends(&config).await?;
    let manager = build_manager(&config, &backends).await;

    match manager.detections().get(workload_uid).await? {
        None => println!("no detection state for workload {workload_uid}"),
        Some(record) => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(["Field", "Value"]);
            let rows = [
                ("workload", record.workload_uid.clone()),
                ("framework", record.framework.clone()),
                ("frameworks", record.frameworks.join(", ")),
                ("type", record.workload_type.as_str().to_string()),
                ("status", record.status.as_str().to_string()),
                ("confidence", format!("{:.3}", record.confidence)),
                ("lifecycle", record.lifecycle.as_str().to_string()),
                ("sources", record.sources.join(", ")),
                ("evidence", record.evidence_count.to_string()),
                ("conflicts", record.conflicts.len().to_string()),
            ];
            for (field, value) in rows {
                table.add_row([field.to_string(), value]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
