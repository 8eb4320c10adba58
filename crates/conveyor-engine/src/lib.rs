//! # Conveyor Orchestration Engine
//!
//! A PostgreSQL-backed engine for reliable execution of linear, versioned
//! workflows.
//!
//! ## Features
//!
//! - **Durable checkpoints**: progress is persisted after every step, so a
//!   crashed worker resumes where it left off instead of re-running work
//! - **Idempotent admission**: at most one live execution per
//!   `(workflow, idempotency_key)`, enforced by a unique constraint
//! - **Automatic retries**: truncated exponential backoff with jitter, at
//!   both the step and the execution level
//! - **Lease-based queue**: at-least-once delivery with deferred
//!   visibility; duplicate deliveries no-op against the state machine
//! - **Sweeper recovery**: stuck executions are reclaimed with guarded
//!   updates, no distributed locks required
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionService                          │
//! │  (idempotent trigger, cancel, retry, status queries)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ExecutionStore + TaskQueue                   │
//! │  (PostgreSQL: definitions, executions, attempts, logs,      │
//! │   lease-based queue_messages)                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              WorkerPool ── Orchestrator ── Sweeper           │
//! │  (dequeue, drive steps through handlers, checkpoint,        │
//! │   retry with backoff, recover crashed work)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_engine::prelude::*;
//!
//! let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
//! let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(MyHandler));
//!
//! let config = EngineConfig::default();
//! let orchestrator = Arc::new(Orchestrator::new(
//!     Arc::clone(&store),
//!     Arc::clone(&queue),
//!     Arc::new(registry),
//!     &config,
//! ));
//!
//! let executions = ExecutionService::new(Arc::clone(&store), Arc::clone(&queue));
//! let pool = WorkerPool::start(orchestrator, queue, WorkerPoolConfig::from_engine(&config));
//!
//! let execution = executions
//!     .trigger(workflow_id, "order-42", json!({"sku": "A1"}), 3)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod service;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::EngineError;
    pub use crate::handler::{HandlerError, HandlerRegistry, TaskHandler};
    pub use crate::model::{
        Execution, ExecutionStatus, LogEntry, LogLevel, StepExecution, StepStatus, Workflow,
        WorkflowStatus, WorkflowStep,
    };
    pub use crate::orchestrator::{Orchestrator, RunOutcome};
    pub use crate::queue::{
        InMemoryTaskQueue, LeasedMessage, PostgresTaskQueue, QueueError, TaskQueue,
    };
    pub use crate::retry::BackoffPolicy;
    pub use crate::service::{ExecutionService, WorkflowService};
    pub use crate::store::{
        ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, StoreError,
    };
    pub use crate::sweeper::Sweeper;
    pub use crate::worker::{WorkerPool, WorkerPoolConfig};
}

// Re-export key types at crate root
pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use handler::{HandlerError, HandlerRegistry, TaskHandler};
pub use model::{
    Execution, ExecutionStatus, LogEntry, LogLevel, NewStep, StepExecution, StepStatus, Workflow,
    WorkflowStatus, WorkflowStep,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use queue::{InMemoryTaskQueue, LeasedMessage, PostgresTaskQueue, QueueError, TaskQueue};
pub use retry::BackoffPolicy;
pub use service::{ExecutionService, WorkflowService};
pub use store::{ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, StoreError};
pub use sweeper::{SweepReport, Sweeper};
pub use worker::{WorkerConfig, WorkerError, WorkerLoop, WorkerPool, WorkerPoolConfig};
