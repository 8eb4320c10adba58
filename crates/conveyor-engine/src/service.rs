//! Typed service operations consumed by the API layer
//!
//! [`WorkflowService`] manages definitions; [`ExecutionService`] admits,
//! cancels, retries and queries executions. Both translate store faults
//! into the stable kinds of [`EngineError`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    Execution, ExecutionStatus, LogEntry, LogLevel, NewExecution, NewLogEntry, NewStep,
    NewWorkflow, StepExecution, Workflow, WorkflowStatus, WorkflowStep,
};
use crate::queue::TaskQueue;
use crate::store::{Admission, ExecutionChange, ExecutionStore};

/// Workflow definition management
pub struct WorkflowService {
    store: Arc<dyn ExecutionStore>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Create a workflow in `draft`
    #[instrument(skip(self, metadata))]
    pub async fn create_workflow(
        &self,
        name: impl Into<String> + std::fmt::Debug,
        version: u32,
        metadata: Value,
    ) -> Result<Workflow, EngineError> {
        let name = name.into();
        if version < 1 {
            return Err(EngineError::Conflict("version must be at least 1".into()));
        }

        let workflow = self
            .store
            .create_workflow(NewWorkflow {
                name,
                version,
                metadata,
            })
            .await?;

        info!(workflow_id = %workflow.id, name = %workflow.name, version, "created workflow");
        Ok(workflow)
    }

    /// Append a step to a draft workflow
    #[instrument(skip(self, new))]
    pub async fn add_step(&self, new: NewStep) -> Result<WorkflowStep, EngineError> {
        if new.timeout_seconds == 0 {
            return Err(EngineError::Conflict(
                "timeout_seconds must be positive".into(),
            ));
        }

        Ok(self.store.add_step(new).await?)
    }

    /// `draft -> active`; the workflow starts admitting executions
    #[instrument(skip(self))]
    pub async fn activate(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let workflow = self
            .store
            .set_workflow_status(workflow_id, &[WorkflowStatus::Draft], WorkflowStatus::Active)
            .await?;
        info!(%workflow_id, "activated workflow");
        Ok(workflow)
    }

    /// `active -> deprecated`; stops admitting, existing executions finish
    #[instrument(skip(self))]
    pub async fn deprecate(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        Ok(self
            .store
            .set_workflow_status(
                workflow_id,
                &[WorkflowStatus::Active],
                WorkflowStatus::Deprecated,
            )
            .await?)
    }

    /// Retire a definition for good
    #[instrument(skip(self))]
    pub async fn archive(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        Ok(self
            .store
            .set_workflow_status(
                workflow_id,
                &[
                    WorkflowStatus::Draft,
                    WorkflowStatus::Active,
                    WorkflowStatus::Deprecated,
                ],
                WorkflowStatus::Archived,
            )
            .await?)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        Ok(self.store.get_workflow(workflow_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.store.list_workflows().await?)
    }

    pub async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, EngineError> {
        // Surface NotFound for absent workflows rather than an empty list
        self.store.get_workflow(workflow_id).await?;
        Ok(self.store.list_steps(workflow_id).await?)
    }
}

/// Execution admission and control
pub struct ExecutionService {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn TaskQueue>,
}

impl ExecutionService {
    pub fn new(store: Arc<dyn ExecutionStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Idempotent trigger
    ///
    /// A repeated trigger with the same `(workflow_id, idempotency_key)`
    /// returns the existing execution unchanged and enqueues nothing.
    /// That holds even after the workflow leaves `active`: duplicate
    /// deliveries of an already-admitted request must keep resolving.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkflowNotActive`] when admitting a fresh execution
    /// against a workflow that is not `active`.
    #[instrument(skip(self, input_data))]
    pub async fn trigger(
        &self,
        workflow_id: Uuid,
        idempotency_key: impl Into<String> + std::fmt::Debug,
        input_data: Value,
        max_retries: u32,
    ) -> Result<Execution, EngineError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        let idempotency_key = idempotency_key.into();

        if let Some(existing) = self
            .store
            .find_execution(workflow_id, &idempotency_key)
            .await?
        {
            info!(execution_id = %existing.id, "trigger matched existing execution");
            return Ok(existing);
        }

        // Only fresh admission requires an active workflow
        if workflow.status != WorkflowStatus::Active {
            return Err(EngineError::WorkflowNotActive(workflow_id));
        }

        let admission = self
            .store
            .insert_execution(NewExecution {
                workflow_id,
                idempotency_key,
                input_data,
                max_retries,
            })
            .await?;

        let execution = match admission {
            Admission::Existing(execution) => {
                // Lost the insert race; the winner's row is the answer
                info!(execution_id = %execution.id, "trigger matched existing execution");
                return Ok(execution);
            }
            Admission::Created(execution) => execution,
        };

        self.store
            .append_log(NewLogEntry::new(
                execution.id,
                LogLevel::Info,
                "execution admitted",
            ))
            .await?;

        // The pending row is durable; if this enqueue is lost the sweeper
        // re-delivers
        if let Err(e) = self.queue.enqueue(execution.id, None).await {
            warn!(execution_id = %execution.id, "enqueue failed, sweeper will recover: {}", e);
        }

        info!(execution_id = %execution.id, %workflow_id, "triggered execution");
        Ok(execution)
    }

    /// Read-through lookup
    pub async fn get(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    pub async fn list(&self, workflow_id: Uuid) -> Result<Vec<Execution>, EngineError> {
        self.store.get_workflow(workflow_id).await?;
        Ok(self.store.list_executions(workflow_id).await?)
    }

    pub async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, EngineError> {
        self.store.get_execution(execution_id).await?;
        Ok(self.store.list_step_executions(execution_id).await?)
    }

    /// Cancel from any non-terminal state
    ///
    /// The row flips immediately; a worker mid-step observes the change at
    /// the next step boundary and discards its in-flight outcome.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self
            .store
            .transition_execution(
                execution_id,
                &[
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    ExecutionStatus::Failed,
                    ExecutionStatus::Retrying,
                ],
                ExecutionChange::new(ExecutionStatus::Cancelled).stamp_completed(),
            )
            .await?;

        self.store
            .append_log(NewLogEntry::new(
                execution_id,
                LogLevel::Info,
                "cancellation requested",
            ))
            .await?;

        info!(%execution_id, "cancelled execution");
        Ok(execution)
    }

    /// Operator retry of a failed execution
    ///
    /// Re-enqueues immediately. Counts against the retry budget; the
    /// count is never reset, which keeps operator retries bounded.
    #[instrument(skip(self))]
    pub async fn retry(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let current = self.store.get_execution(execution_id).await?;

        if current.status != ExecutionStatus::Failed {
            return Err(EngineError::InvalidTransition {
                from: current.status.to_string(),
                to: ExecutionStatus::Retrying.to_string(),
            });
        }
        if current.retry_count >= current.max_retries {
            return Err(EngineError::Conflict(format!(
                "retry budget exhausted ({} of {})",
                current.retry_count, current.max_retries
            )));
        }

        let execution = self
            .store
            .transition_execution(
                execution_id,
                &[ExecutionStatus::Failed],
                ExecutionChange::new(ExecutionStatus::Retrying).increment_retry(),
            )
            .await?;

        self.store
            .append_log(NewLogEntry::new(
                execution_id,
                LogLevel::Info,
                "operator retry requested",
            ))
            .await?;

        self.queue.enqueue(execution_id, None).await?;

        info!(%execution_id, retry_count = execution.retry_count, "retrying execution");
        Ok(execution)
    }

    /// Audit log in `(timestamp, id)` order
    ///
    /// `min_level` drops entries below the given severity.
    pub async fn list_logs(
        &self,
        execution_id: Uuid,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, EngineError> {
        self.store.get_execution(execution_id).await?;
        Ok(self.store.list_logs(execution_id, min_level).await?)
    }
}
