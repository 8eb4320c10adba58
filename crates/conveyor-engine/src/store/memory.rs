//! In-memory implementation of ExecutionStore for testing
//!
//! Mirrors the semantics of the PostgreSQL implementation, including the
//! guarded transitions and idempotent admission, so engine behavior can be
//! tested without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{Admission, ExecutionChange, ExecutionStore, StoreError};
use crate::model::{
    Execution, ExecutionStatus, LogEntry, LogLevel, NewExecution, NewLogEntry, NewStep,
    NewStepExecution, NewWorkflow, StepExecution, StepStatus, Workflow, WorkflowStatus,
    WorkflowStep,
};
use crate::state;

/// In-memory implementation of ExecutionStore
///
/// # Example
///
/// ```
/// use conveyor_engine::store::InMemoryExecutionStore;
///
/// let store = InMemoryExecutionStore::new();
/// ```
pub struct InMemoryExecutionStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    steps: RwLock<HashMap<Uuid, WorkflowStep>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    step_executions: RwLock<HashMap<Uuid, StepExecution>>,
    logs: RwLock<Vec<LogEntry>>,
    log_seq: AtomicI64,
}

impl InMemoryExecutionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            step_executions: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
            log_seq: AtomicI64::new(0),
        }
    }

    /// Number of executions across all workflows
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Number of step-execution rows across all executions
    pub fn step_execution_count(&self) -> usize {
        self.step_executions.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.steps.write().clear();
        self.executions.write().clear();
        self.step_executions.write().clear();
        self.logs.write().clear();
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write();

        if workflows
            .values()
            .any(|w| w.name == new.name && w.version == new.version)
        {
            return Err(StoreError::DuplicateWorkflow {
                name: new.name,
                version: new.version,
            });
        }

        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: new.name,
            version: new.version,
            status: WorkflowStatus::Draft,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut all: Vec<_> = self.workflows.read().values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn set_workflow_status(
        &self,
        id: Uuid,
        allowed_from: &[WorkflowStatus],
        to: WorkflowStatus,
    ) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;

        if !allowed_from.contains(&workflow.status) {
            return Err(StoreError::WorkflowTransitionConflict {
                actual: workflow.status,
                attempted: to,
            });
        }

        workflow.status = to;
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn add_step(&self, new: NewStep) -> Result<WorkflowStep, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(&new.workflow_id)
            .ok_or(StoreError::WorkflowNotFound(new.workflow_id))?;
        if workflow.status != WorkflowStatus::Draft {
            return Err(StoreError::WorkflowNotEditable(new.workflow_id));
        }
        drop(workflows);

        let mut steps = self.steps.write();
        if steps
            .values()
            .any(|s| s.workflow_id == new.workflow_id && s.step_order == new.step_order)
        {
            return Err(StoreError::DuplicateStep {
                workflow_id: new.workflow_id,
                step_order: new.step_order,
            });
        }

        let now = Utc::now();
        let step = WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id: new.workflow_id,
            name: new.name,
            task_type: new.task_type,
            step_order: new.step_order,
            config: new.config,
            timeout_seconds: new.timeout_seconds,
            max_retries: new.max_retries,
            created_at: now,
            updated_at: now,
        };
        steps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError> {
        let mut steps: Vec<_> = self
            .steps
            .read()
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn insert_execution(&self, new: NewExecution) -> Result<Admission, StoreError> {
        if !self.workflows.read().contains_key(&new.workflow_id) {
            return Err(StoreError::WorkflowNotFound(new.workflow_id));
        }

        let mut executions = self.executions.write();

        // First insert wins; losers get the winner back
        if let Some(existing) = executions
            .values()
            .find(|e| e.workflow_id == new.workflow_id && e.idempotency_key == new.idempotency_key)
        {
            return Ok(Admission::Existing(existing.clone()));
        }

        let now = Utc::now();
        let execution = Execution {
            id: Uuid::now_v7(),
            workflow_id: new.workflow_id,
            idempotency_key: new.idempotency_key,
            status: ExecutionStatus::Pending,
            current_step_order: 0,
            retry_count: 0,
            max_retries: new.max_retries,
            input_data: new.input_data,
            output_data: None,
            error_message: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        executions.insert(execution.id, execution.clone());
        Ok(Admission::Created(execution))
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    async fn find_execution(
        &self,
        workflow_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Execution>, StoreError> {
        Ok(self
            .executions
            .read()
            .values()
            .find(|e| e.workflow_id == workflow_id && e.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        let mut all: Vec<_> = self
            .executions
            .read()
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        all.sort_by_key(|e| e.created_at);
        Ok(all)
    }

    async fn transition_execution(
        &self,
        id: Uuid,
        allowed_from: &[ExecutionStatus],
        change: ExecutionChange,
    ) -> Result<Execution, StoreError> {
        // Reject edges the state machine does not define, regardless of
        // what the row currently holds
        for from in allowed_from {
            if !state::execution_transition_allowed(*from, change.to) {
                return Err(StoreError::InvalidTransition {
                    from: *from,
                    to: change.to,
                });
            }
        }

        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;

        if !allowed_from.contains(&execution.status) {
            return Err(StoreError::TransitionConflict {
                actual: execution.status,
                attempted: change.to,
            });
        }

        let now = Utc::now();
        execution.status = change.to;
        if let Some(message) = change.error_message {
            execution.error_message = Some(message);
        }
        if let Some(output) = change.output_data {
            execution.output_data = Some(output);
        }
        if let Some(at) = change.scheduled_at {
            execution.scheduled_at = Some(at);
        }
        if change.stamp_started && execution.started_at.is_none() {
            execution.started_at = Some(now);
        }
        if change.stamp_completed {
            execution.completed_at = Some(now);
        }
        if change.increment_retry {
            execution.retry_count += 1;
        }
        execution.updated_at = now;

        Ok(execution.clone())
    }

    async fn sweep_stuck_running(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut executions = self.executions.write();
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for execution in executions.values_mut() {
            if execution.status == ExecutionStatus::Running && execution.updated_at < stale_before {
                execution.status = ExecutionStatus::Retrying;
                execution.updated_at = now;
                reclaimed.push(execution.id);
            }
        }

        Ok(reclaimed)
    }

    async fn list_unclaimed_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .executions
            .read()
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending && e.created_at < created_before)
            .map(|e| e.id)
            .collect())
    }

    async fn list_overdue_retrying(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        Ok(self
            .executions
            .read()
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Retrying
                    && e.scheduled_at.map_or(true, |at| at <= now)
                    && e.updated_at < updated_before
            })
            .map(|e| e.id)
            .collect())
    }

    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError> {
        if !self.executions.read().contains_key(&new.execution_id) {
            return Err(StoreError::ExecutionNotFound(new.execution_id));
        }

        let step_execution = StepExecution {
            id: Uuid::now_v7(),
            execution_id: new.execution_id,
            step_id: new.step_id,
            step_order: new.step_order,
            status: StepStatus::Pending,
            attempt_number: new.attempt_number,
            input_data: new.input_data,
            output_data: None,
            error_message: None,
            error_details: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };

        self.step_executions
            .write()
            .insert(step_execution.id, step_execution.clone());
        Ok(step_execution)
    }

    async fn mark_step_running(&self, id: Uuid) -> Result<(), StoreError> {
        let mut step_executions = self.step_executions.write();
        let row = step_executions
            .get_mut(&id)
            .ok_or(StoreError::StepExecutionNotFound(id))?;

        if !state::step_transition_allowed(row.status, StepStatus::Running) {
            return Err(StoreError::InvalidStepTransition {
                from: row.status,
                to: StepStatus::Running,
            });
        }

        row.status = StepStatus::Running;
        row.started_at = Some(Utc::now());
        Ok(())
    }

    async fn complete_step(
        &self,
        step_execution_id: Uuid,
        output: Value,
        execution_id: Uuid,
        next_step_order: u32,
    ) -> Result<(), StoreError> {
        // Lock both maps for the duration so the attempt outcome and the
        // cursor advance are observed together
        let mut step_executions = self.step_executions.write();
        let mut executions = self.executions.write();

        let row = step_executions
            .get_mut(&step_execution_id)
            .ok_or(StoreError::StepExecutionNotFound(step_execution_id))?;

        if !state::step_transition_allowed(row.status, StepStatus::Completed) {
            return Err(StoreError::InvalidStepTransition {
                from: row.status,
                to: StepStatus::Completed,
            });
        }

        let execution = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        let now = Utc::now();
        row.status = StepStatus::Completed;
        row.output_data = Some(output);
        row.completed_at = Some(now);

        // Cursor is monotone; a stale writer can never move it backwards
        execution.current_step_order = execution.current_step_order.max(next_step_order);
        execution.updated_at = now;

        Ok(())
    }

    async fn fail_step(
        &self,
        step_execution_id: Uuid,
        message: &str,
        details: Option<Value>,
    ) -> Result<(), StoreError> {
        let mut step_executions = self.step_executions.write();
        let row = step_executions
            .get_mut(&step_execution_id)
            .ok_or(StoreError::StepExecutionNotFound(step_execution_id))?;

        if !state::step_transition_allowed(row.status, StepStatus::Failed) {
            return Err(StoreError::InvalidStepTransition {
                from: row.status,
                to: StepStatus::Failed,
            });
        }

        row.status = StepStatus::Failed;
        row.error_message = Some(message.to_string());
        row.error_details = details;
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn max_attempt_number(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<u32, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id && s.step_order == step_order)
            .map(|s| s.attempt_number)
            .max()
            .unwrap_or(0))
    }

    async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let mut rows: Vec<_> = self
            .step_executions
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.step_order, s.attempt_number));
        Ok(rows)
    }

    async fn last_completed_output(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .filter(|s| s.execution_id == execution_id && s.status == StepStatus::Completed)
            .max_by_key(|s| (s.step_order, s.attempt_number))
            .and_then(|s| s.output_data.clone()))
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StoreError> {
        let id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.write().push(LogEntry {
            id,
            execution_id: entry.execution_id,
            step_execution_id: entry.step_execution_id,
            level: entry.level,
            message: entry.message,
            details: entry.details,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn list_logs(
        &self,
        execution_id: Uuid,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let floor = min_level.unwrap_or(LogLevel::Debug);
        let mut entries: Vec<_> = self
            .logs
            .read()
            .iter()
            .filter(|l| l.execution_id == execution_id && l.level >= floor)
            .cloned()
            .collect();
        entries.sort_by_key(|l| (l.timestamp, l.id));
        Ok(entries)
    }
}
