//! Worker loop and pool
//!
//! Each worker loop polls the queue, hands claimed executions to the
//! orchestrator and acknowledges on clean return. Orchestration runs in a
//! spawned task so a panicking handler neither takes the loop down nor
//! gets its message acknowledged: the lease expires and the message is
//! re-delivered. Idle loops back off their poll interval and reset it as
//! soon as work appears.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use crate::queue::{LeasedMessage, TaskQueue};

/// Per-loop worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue lease duration for claimed messages
    ///
    /// Must exceed the worst-case step timeout plus one step backoff
    /// interval, or the lease may expire under live work.
    pub visibility_timeout: Duration,

    /// Poll interval while work keeps arriving
    pub poll_min_interval: Duration,

    /// Poll interval ceiling while idle
    pub poll_max_interval: Duration,

    /// Idle backoff multiplier
    pub poll_backoff_multiplier: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(600),
            poll_min_interval: Duration::from_millis(100),
            poll_max_interval: Duration::from_secs(5),
            poll_backoff_multiplier: 1.5,
        }
    }
}

impl WorkerConfig {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_poll_min_interval(mut self, interval: Duration) -> Self {
        self.poll_min_interval = interval;
        self
    }

    pub fn with_poll_max_interval(mut self, interval: Duration) -> Self {
        self.poll_max_interval = interval;
        self
    }

    pub fn with_poll_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.poll_backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Pool-level configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker loops
    pub concurrency: usize,

    /// Per-loop settings
    pub worker: WorkerConfig,

    /// How long shutdown waits for in-flight orchestration
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            worker: WorkerConfig::default(),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            worker: WorkerConfig::default().with_visibility_timeout(config.queue_visibility()),
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// In-flight work outlived the grace period
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// A single dequeue-run-ack loop
///
/// Single-threaded by design; parallelism comes from running several
/// loops (see [`WorkerPool`]).
pub struct WorkerLoop {
    worker_id: String,
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn TaskQueue>,
    config: WorkerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerLoop {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn TaskQueue>,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            orchestrator,
            queue,
            config: config.clone(),
            current_interval: config.poll_min_interval,
            shutdown_rx,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll until shutdown is signaled
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run(mut self) {
        debug!("worker loop started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.queue.dequeue(self.config.visibility_timeout).await {
                Ok(Some(message)) => {
                    self.reset_backoff();
                    self.process(message).await;
                }
                Ok(None) => {
                    self.increase_backoff();
                    if self.wait().await {
                        break;
                    }
                }
                Err(e) => {
                    error!("dequeue failed: {}", e);
                    self.increase_backoff();
                    if self.wait().await {
                        break;
                    }
                }
            }
        }

        debug!("worker loop exited");
    }

    /// Run one claimed execution and settle the message
    async fn process(&self, message: LeasedMessage) {
        let execution_id = message.execution_id;
        let orchestrator = Arc::clone(&self.orchestrator);

        // Spawned so a panic unwinds into the JoinError instead of the loop
        let result = tokio::spawn(async move { orchestrator.run(execution_id).await }).await;

        let ack = match result {
            Ok(Ok(outcome)) => {
                debug!(%execution_id, ?outcome, "orchestration settled");
                true
            }
            Ok(Err(
                err @ (EngineError::StoreUnavailable(_) | EngineError::QueueUnavailable(_)),
            )) => {
                // Infrastructure fault: leave the message leased; expiry
                // re-delivers it
                warn!(%execution_id, "orchestration aborted: {}", err);
                false
            }
            Ok(Err(err)) => {
                // Anything else (e.g. the row is gone) will not improve on
                // re-delivery
                warn!(%execution_id, "orchestration rejected: {}", err);
                true
            }
            Err(join_err) => {
                error!(%execution_id, "orchestration crashed: {}", join_err);
                false
            }
        };

        if ack {
            if let Err(e) = self.queue.ack(message.lease_token).await {
                warn!(%execution_id, "ack failed: {}", e);
            }
        }
    }

    /// Sleep the current interval; true means shutdown arrived
    async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.poll_min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.poll_backoff_multiplier,
        );
        self.current_interval = next.min(self.config.poll_max_interval);
    }
}

/// Runs `concurrency` worker loops and shuts them down together
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::start(orchestrator, queue, WorkerPoolConfig::from_engine(&config));
/// // ...
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl WorkerPool {
    /// Spawn the worker loops
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn TaskQueue>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..config.concurrency.max(1))
            .map(|_| {
                let worker = WorkerLoop::new(
                    Arc::clone(&orchestrator),
                    Arc::clone(&queue),
                    config.worker.clone(),
                    shutdown_rx.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        info!(concurrency = config.concurrency, "worker pool started");

        Self {
            shutdown_tx,
            handles,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Stop pulling new messages, wait for in-flight work up to the grace
    /// period, then return
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        info!("worker pool shutting down");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };

        tokio::time::timeout(self.shutdown_grace, drain)
            .await
            .map_err(|_| WorkerError::ShutdownTimeout)?;

        info!("worker pool stopped");
        Ok(())
    }
}
