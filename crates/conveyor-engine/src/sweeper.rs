//! Stuck-execution sweeper
//!
//! Crash recovery without distributed locks: a worker that dies mid-step
//! leaves its execution `running` with a stale `updated_at`. The sweeper
//! periodically flips such rows back to `retrying` via a guarded update
//! and re-enqueues them. It also re-delivers `pending` rows whose original
//! enqueue was lost and `retrying` rows whose delayed message never
//! arrived; the row is the durable retry state, the queue only owns the
//! wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::queue::TaskQueue;
use crate::store::ExecutionStore;

/// What one sweep recovered
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// `running` rows reclaimed from crashed workers
    pub stuck: usize,

    /// `pending` rows re-enqueued
    pub pending: usize,

    /// overdue `retrying` rows re-enqueued
    pub retrying: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.stuck + self.pending + self.retrying
    }
}

/// Periodic recovery of executions the queue lost track of
pub struct Sweeper {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn TaskQueue>,
    interval: Duration,
    stuck_threshold: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<dyn TaskQueue>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            interval: config.sweeper_interval(),
            stuck_threshold: config.sweeper_stuck_threshold(),
        }
    }

    /// Run until shutdown is signaled
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The immediate first tick would race workers on fresh deployments
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.total() > 0 => {
                            info!(
                                stuck = report.stuck,
                                pending = report.pending,
                                retrying = report.retrying,
                                "sweeper recovered executions"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("sweep failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("sweeper: shutdown requested");
                    break;
                }
            }
        }

        debug!("sweeper exited");
    }

    /// One recovery pass
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stuck_threshold).unwrap_or_default();
        let mut report = SweepReport::default();

        // Crashed workers: running + stale. The guarded update means a
        // worker that is merely slow but still writing keeps its claim.
        let stuck = self.store.sweep_stuck_running(cutoff).await?;
        report.stuck = self.enqueue_all(&stuck).await;

        // Enqueue-after-commit losses
        let pending = self.store.list_unclaimed_pending(cutoff).await?;
        report.pending = self.enqueue_all(&pending).await;

        // Delayed deliveries that never came back
        let retrying = self.store.list_overdue_retrying(cutoff).await?;
        report.retrying = self.enqueue_all(&retrying).await;

        Ok(report)
    }

    async fn enqueue_all(&self, ids: &[Uuid]) -> usize {
        let mut enqueued = 0;
        for &id in ids {
            match self.queue.enqueue(id, None).await {
                Ok(()) => enqueued += 1,
                // Leave the row as is; the next sweep retries
                Err(e) => error!(execution_id = %id, "re-enqueue failed: {}", e),
            }
        }
        enqueued
    }
}
