//! Evidence cleanup background job.
//!
//! Sweeps the evidence store on a configurable interval: expired records
//! are deleted, processed records past the retention window are dropped,
//! and the per-workload cap is enforced. Each deletion is idempotent per
//! record, so a cancelled sweep needs no rollback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::interval;

use crate::domain::errors::DetectionResult;
use crate::domain::ports::EvidenceRepository;

/// Configuration for the evidence sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// How long processed records are retained.
    pub keep_processed_for: chrono::Duration,
    /// Maximum records deleted per category per sweep.
    pub batch_size: usize,
    /// Cap on records kept per workload.
    pub max_per_workload: usize,
    /// Whether to sweep immediately on startup.
    pub run_on_startup: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
            keep_processed_for: chrono::Duration::days(3),
            batch_size: 1000,
            max_per_workload: 100,
            run_on_startup: false,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub expired_deleted: u64,
    pub processed_deleted: u64,
    pub capped_deleted: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.expired_deleted + self.processed_deleted + self.capped_deleted
    }
}

/// Running counters for the sweeper.
#[derive(Debug, Clone, Default)]
pub struct SweeperStatus {
    pub running: bool,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub total_deleted: u64,
}

/// Handle to observe and stop the sweeper.
pub struct SweeperHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<SweeperStatus>>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub async fn status(&self) -> SweeperStatus {
        self.status.read().await.clone()
    }
}

/// Evidence cleanup daemon.
pub struct EvidenceSweeper {
    repository: Arc<dyn EvidenceRepository>,
    config: SweeperConfig,
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<SweeperStatus>>,
}

impl EvidenceSweeper {
    pub fn new(repository: Arc<dyn EvidenceRepository>, config: SweeperConfig) -> Self {
        Self {
            repository,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(SweeperStatus::default())),
        }
    }

    pub fn handle(&self) -> SweeperHandle {
        SweeperHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Run one sweep now.
    pub async fn sweep_once(&self) -> DetectionResult<SweepReport> {
        let now = Utc::now();
        let expired_deleted = self
            .repository
            .delete_expired(now, self.config.batch_size)
            .await?;
        let processed_deleted = self
            .repository
            .delete_processed_before(now - self.config.keep_processed_for, self.config.batch_size)
            .await?;
        let capped_deleted = self
            .repository
            .prune_per_workload(self.config.max_per_workload)
            .await?;

        Ok(SweepReport {
            expired_deleted,
            processed_deleted,
            capped_deleted,
        })
    }

    /// Run the sweep loop until stopped.
    pub async fn run(self) {
        {
            let mut status = self.status.write().await;
            status.running = true;
        }
        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "evidence sweeper started"
        );

        let mut ticker = interval(self.config.sweep_interval);
        // The first tick of tokio's interval fires immediately; consume it
        // unless a startup sweep was requested.
        if !self.config.run_on_startup {
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    self.run_cycle().await;
                }
            }

            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
        }

        {
            let mut status = self.status.write().await;
            status.running = false;
        }
        tracing::info!("evidence sweeper stopped");
    }

    async fn run_cycle(&self) {
        match self.sweep_once().await {
            Ok(report) => {
                let mut status = self.status.write().await;
                status.total_runs += 1;
                status.total_deleted += report.total();
                if report.total() > 0 {
                    tracing::info!(
                        expired = report.expired_deleted,
                        processed = report.processed_deleted,
                        capped = report.capped_deleted,
                        "evidence sweep complete"
                    );
                }
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.total_runs += 1;
                status.failed_runs += 1;
                tracing::warn!(error = %e, "evidence sweep failed");
            }
        }
    }
}
