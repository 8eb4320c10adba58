//! Durable store for workflows, executions, attempts and logs
//!
//! The store is the single source of truth. Every status write is a
//! single-statement guarded update validated against the lifecycle state
//! machines; a lost guard surfaces as [`StoreError::TransitionConflict`]
//! and the caller re-reads and decides.

mod memory;
mod postgres;

pub use memory::InMemoryExecutionStore;
pub use postgres::PostgresExecutionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{
    Execution, ExecutionStatus, LogEntry, LogLevel, NewExecution, NewLogEntry, NewStep,
    NewStepExecution, NewWorkflow, StepExecution, StepStatus, Workflow, WorkflowStatus,
    WorkflowStep,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Step execution not found
    #[error("step execution not found: {0}")]
    StepExecutionNotFound(Uuid),

    /// `(name, version)` already taken
    #[error("workflow {name} v{version} already exists")]
    DuplicateWorkflow { name: String, version: u32 },

    /// `(workflow_id, step_order)` already taken
    #[error("workflow {workflow_id} already has a step at order {step_order}")]
    DuplicateStep { workflow_id: Uuid, step_order: u32 },

    /// Step mutation against a workflow that left `draft`
    #[error("workflow {0} is not editable")]
    WorkflowNotEditable(Uuid),

    /// Workflow status guard lost to a concurrent writer
    #[error("workflow transition to {attempted} lost to concurrent state {actual}")]
    WorkflowTransitionConflict {
        actual: WorkflowStatus,
        attempted: WorkflowStatus,
    },

    /// Execution status guard lost to a concurrent writer; re-read and decide
    #[error("transition to {attempted} lost to concurrent state {actual}")]
    TransitionConflict {
        actual: ExecutionStatus,
        attempted: ExecutionStatus,
    },

    /// The execution state machine has no such edge
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// The step-attempt state machine has no such edge
    #[error("invalid step transition: {from} -> {to}")]
    InvalidStepTransition { from: StepStatus, to: StepStatus },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of idempotent execution admission
///
/// First insert wins; losers get the winner back unchanged.
#[derive(Debug, Clone)]
pub enum Admission {
    /// A fresh row was inserted
    Created(Execution),

    /// A row with the same `(workflow_id, idempotency_key)` already existed
    Existing(Execution),
}

impl Admission {
    pub fn execution(self) -> Execution {
        match self {
            Self::Created(e) | Self::Existing(e) => e,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Field updates applied together with a guarded execution transition
///
/// All fields ride the same single-statement update as the status change,
/// so observers never see a half-applied transition.
#[derive(Debug, Clone)]
pub struct ExecutionChange {
    pub to: ExecutionStatus,
    pub error_message: Option<String>,
    pub output_data: Option<Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub stamp_started: bool,
    pub stamp_completed: bool,
    pub increment_retry: bool,
}

impl ExecutionChange {
    pub fn new(to: ExecutionStatus) -> Self {
        Self {
            to,
            error_message: None,
            output_data: None,
            scheduled_at: None,
            stamp_started: false,
            stamp_completed: false,
            increment_retry: false,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output_data = Some(output);
        self
    }

    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Stamp `started_at` now, unless already set
    pub fn stamp_started(mut self) -> Self {
        self.stamp_started = true;
        self
    }

    /// Stamp `completed_at` now
    pub fn stamp_completed(mut self) -> Self {
        self.stamp_completed = true;
        self
    }

    /// Bump `retry_count` by one
    pub fn increment_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }
}

/// Store for workflow definitions, executions and audit logs
///
/// Implementations must be thread-safe and support concurrent access;
/// the in-memory implementation mirrors the SQL semantics for tests.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow Definitions
    // =========================================================================

    /// Create a workflow in `draft`; rejects duplicate `(name, version)`
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Guarded workflow lifecycle change
    async fn set_workflow_status(
        &self,
        id: Uuid,
        allowed_from: &[WorkflowStatus],
        to: WorkflowStatus,
    ) -> Result<Workflow, StoreError>;

    /// Append a step; only while the owning workflow is `draft`
    async fn add_step(&self, new: NewStep) -> Result<WorkflowStep, StoreError>;

    /// Steps of a workflow, ordered by `step_order`
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError>;

    // =========================================================================
    // Executions
    // =========================================================================

    /// Idempotent admission on `(workflow_id, idempotency_key)`
    async fn insert_execution(&self, new: NewExecution) -> Result<Admission, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError>;

    /// Look up an execution by its idempotency pair
    async fn find_execution(
        &self,
        workflow_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Execution>, StoreError>;

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError>;

    /// Guarded status transition
    ///
    /// Rejects pairs the state machine does not allow; returns
    /// [`StoreError::TransitionConflict`] when the guard loses a race.
    async fn transition_execution(
        &self,
        id: Uuid,
        allowed_from: &[ExecutionStatus],
        change: ExecutionChange,
    ) -> Result<Execution, StoreError>;

    /// Flip `running` executions untouched since `stale_before` to
    /// `retrying` (crash recovery); returns the affected ids
    async fn sweep_stuck_running(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// `pending` executions created before the cutoff (lost enqueues)
    async fn list_unclaimed_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// `retrying` executions whose `scheduled_at` has passed but which have
    /// not been touched since the cutoff (lost delayed enqueues)
    async fn list_overdue_retrying(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    // =========================================================================
    // Step Executions
    // =========================================================================

    /// Record a fresh attempt in `pending`
    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError>;

    /// `pending -> running`, stamping `started_at`
    async fn mark_step_running(&self, id: Uuid) -> Result<(), StoreError>;

    /// Settle an attempt as `completed` and advance the execution cursor to
    /// `next_step_order` in the same atomic write
    async fn complete_step(
        &self,
        step_execution_id: Uuid,
        output: Value,
        execution_id: Uuid,
        next_step_order: u32,
    ) -> Result<(), StoreError>;

    /// Settle an attempt as `failed`
    async fn fail_step(
        &self,
        step_execution_id: Uuid,
        message: &str,
        details: Option<Value>,
    ) -> Result<(), StoreError>;

    /// Highest attempt number recorded for `(execution_id, step_order)`,
    /// 0 when the step has never been visited
    async fn max_attempt_number(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<u32, StoreError>;

    /// All attempts of an execution, ordered by `(step_order, attempt_number)`
    async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// Output of the latest completed step, if any; the authoritative input
    /// for the next step on resume
    async fn last_completed_output(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<Value>, StoreError>;

    // =========================================================================
    // Execution Logs
    // =========================================================================

    /// Append an immutable audit record
    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StoreError>;

    /// Logs of an execution in `(timestamp, id)` order, optionally filtered
    /// to a minimum severity
    async fn list_logs(
        &self,
        execution_id: Uuid,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, StoreError>;
}
