//! Recovery Worker
//!
//! Background worker that scans for and resumes stalled settlement tasks.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::coordinator::SettlementCoordinator;
use crate::error::Result;

/// Retries after which an in-flight task is reported as stuck
const STUCK_RETRY_THRESHOLD: i32 = 10;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale tasks
    pub scan_interval: Duration,
    /// How long a task must sit untouched to be picked up
    pub stale_threshold: Duration,
    /// Maximum tasks to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

pub struct SettlementWorker {
    coordinator: Arc<SettlementCoordinator>,
    config: WorkerConfig,
}

impl SettlementWorker {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Runs forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            stale_threshold_ms = self.config.stale_threshold.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting settlement recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e.details(), "Settlement recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One scan; returns how many tasks changed state
    pub async fn scan_and_recover(&self) -> Result<usize> {
        let stale = self
            .coordinator
            .tasks()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            debug!("No stale settlement tasks");
            return Ok(0);
        }
        info!(count = stale.len(), "Found stale settlement tasks");

        let mut advanced = 0;
        for task in &stale {
            if task.state.is_in_flight() && task.retry_count > STUCK_RETRY_THRESHOLD {
                warn!(
                    task_id = %task.task_id,
                    state = %task.state,
                    retry_count = task.retry_count,
                    "CRITICAL: settlement stuck with funds in flight"
                );
            }

            match self.coordinator.execute(&task.task_id).await {
                Ok(state) if state != task.state => {
                    info!(task_id = %task.task_id, old_state = %task.state, new_state = %state, "Settlement task advanced");
                    advanced += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e.details(), "Failed to recover settlement task");
                }
            }
        }
        Ok(advanced)
    }
}
