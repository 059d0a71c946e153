//! Undetected-workload recovery daemon.
//!
//! Periodically runs the orchestrator's recovery scan so that workloads
//! whose detection events were missed still get a detection coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;

use crate::services::task_orchestrator::TaskOrchestrator;

/// Configuration for the recovery scanner.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Interval between scans.
    pub scan_interval: Duration,
    /// Whether to scan immediately on startup.
    pub run_on_startup: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            run_on_startup: true,
        }
    }
}

/// Running counters for the scanner.
#[derive(Debug, Clone, Default)]
pub struct ScannerStatus {
    pub running: bool,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub coordinators_created: u64,
}

/// Handle to observe and stop the scanner.
pub struct ScannerHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<ScannerStatus>>,
}

impl ScannerHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub async fn status(&self) -> ScannerStatus {
        self.status.read().await.clone()
    }
}

/// Periodic recovery scanner.
pub struct DetectionScanner {
    orchestrator: Arc<TaskOrchestrator>,
    config: ScannerConfig,
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<ScannerStatus>>,
}

impl DetectionScanner {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, config: ScannerConfig) -> Self {
        Self {
            orchestrator,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(ScannerStatus::default())),
        }
    }

    pub fn handle(&self) -> ScannerHandle {
        ScannerHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Run the scan loop until stopped.
    pub async fn run(self) {
        {
            let mut status = self.status.write().await;
            status.running = true;
        }
        tracing::info!(
            interval_secs = self.config.scan_interval.as_secs(),
            "detection scanner started"
        );

        let mut ticker = interval(self.config.scan_interval);
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
        tracing::info!("detection scanner stopped");
    }

    async fn run_cycle(&self) {
        match self.orchestrator.scan_for_undetected_workloads().await {
            Ok(report) => {
                let mut status = self.status.write().await;
                status.total_runs += 1;
                status.coordinators_created += report.created as u64;
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.total_runs += 1;
                status.failed_runs += 1;
                tracing::warn!(error = %e, "undetected workload scan failed");
            }
        }
    }
}
