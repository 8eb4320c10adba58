//! PostgreSQL implementation of ExecutionStore
//!
//! Production persistence using PostgreSQL with:
//! - Status-guarded single-statement transitions (optimistic concurrency)
//! - Idempotent admission via the `(workflow_id, idempotency_key)` unique index
//! - Atomic checkpointing of step outcome + execution cursor

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{Admission, ExecutionChange, ExecutionStore, StoreError};
use crate::model::{
    Execution, ExecutionStatus, LogEntry, LogLevel, NewExecution, NewLogEntry, NewStep,
    NewStepExecution, NewWorkflow, StepExecution, StepStatus, Workflow, WorkflowStatus,
    WorkflowStep,
};
use crate::state;

/// PostgreSQL implementation of ExecutionStore
///
/// Uses a connection pool for efficient access; safe to clone and share
/// across worker tasks.
///
/// # Example
///
/// ```ignore
/// use conveyor_engine::store::PostgresExecutionStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/conveyor").await?;
/// let store = PostgresExecutionStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, new))]
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflows (id, name, version, status, metadata)
            VALUES ($1, $2, $3, 'draft', $4)
            RETURNING id, name, version, status, metadata, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&new.name)
        .bind(new.version as i32)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateWorkflow {
                    name: new.name.clone(),
                    version: new.version,
                }
            } else {
                error!("Failed to create workflow: {}", e);
                StoreError::Database(e.to_string())
            }
        })?;

        let workflow = map_workflow(&row)?;
        debug!(workflow_id = %workflow.id, name = %workflow.name, "created workflow");
        Ok(workflow)
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, version, status, metadata, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::WorkflowNotFound(id))?;

        map_workflow(&row)
    }

    #[instrument(skip(self))]
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, version, status, metadata, created_at, updated_at
            FROM workflows
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(map_workflow).collect()
    }

    #[instrument(skip(self))]
    async fn set_workflow_status(
        &self,
        id: Uuid,
        allowed_from: &[WorkflowStatus],
        to: WorkflowStatus,
    ) -> Result<Workflow, StoreError> {
        let from: Vec<String> = allowed_from.iter().map(|s| s.to_string()).collect();

        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING id, name, version, status, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(&from)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        match row {
            Some(row) => {
                debug!(workflow_id = %id, status = %to, "updated workflow status");
                map_workflow(&row)
            }
            None => {
                let current = self.get_workflow(id).await?;
                Err(StoreError::WorkflowTransitionConflict {
                    actual: current.status,
                    attempted: to,
                })
            }
        }
    }

    #[instrument(skip(self, new))]
    async fn add_step(&self, new: NewStep) -> Result<WorkflowStep, StoreError> {
        let workflow = self.get_workflow(new.workflow_id).await?;
        if workflow.status != WorkflowStatus::Draft {
            return Err(StoreError::WorkflowNotEditable(new.workflow_id));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO workflow_steps (
                id, workflow_id, name, task_type, step_order, config,
                timeout_seconds, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, workflow_id, name, task_type, step_order, config,
                      timeout_seconds, max_retries, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.workflow_id)
        .bind(&new.name)
        .bind(&new.task_type)
        .bind(new.step_order as i32)
        .bind(&new.config)
        .bind(new.timeout_seconds as i32)
        .bind(new.max_retries as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateStep {
                    workflow_id: new.workflow_id,
                    step_order: new.step_order,
                }
            } else {
                error!("Failed to add step: {}", e);
                StoreError::Database(e.to_string())
            }
        })?;

        map_step(&row)
    }

    #[instrument(skip(self))]
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, name, task_type, step_order, config,
                   timeout_seconds, max_retries, created_at, updated_at
            FROM workflow_steps
            WHERE workflow_id = $1
            ORDER BY step_order
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(map_step).collect()
    }

    #[instrument(skip(self, new))]
    async fn insert_execution(&self, new: NewExecution) -> Result<Admission, StoreError> {
        // First insert wins; ON CONFLICT makes the race benign
        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, idempotency_key, status, current_step_order,
                retry_count, max_retries, input_data
            )
            VALUES ($1, $2, $3, 'pending', 0, 0, $4, $5)
            ON CONFLICT (workflow_id, idempotency_key) DO NOTHING
            RETURNING id, workflow_id, idempotency_key, status, current_step_order,
                      retry_count, max_retries, input_data, output_data, error_message,
                      scheduled_at, started_at, completed_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.workflow_id)
        .bind(&new.idempotency_key)
        .bind(new.max_retries as i32)
        .bind(&new.input_data)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if let Some(row) = inserted {
            let execution = map_execution(&row)?;
            debug!(execution_id = %execution.id, "admitted execution");
            return Ok(Admission::Created(execution));
        }

        // Lost the race (or a retry of the same trigger): return the winner
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, idempotency_key, status, current_step_order,
                   retry_count, max_retries, input_data, output_data, error_message,
                   scheduled_at, started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE workflow_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(new.workflow_id)
        .bind(&new.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Admission::Existing(map_execution(&row)?))
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, idempotency_key, status, current_step_order,
                   retry_count, max_retries, input_data, output_data, error_message,
                   scheduled_at, started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::ExecutionNotFound(id))?;

        map_execution(&row)
    }

    #[instrument(skip(self))]
    async fn find_execution(
        &self,
        workflow_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, idempotency_key, status, current_step_order,
                   retry_count, max_retries, input_data, output_data, error_message,
                   scheduled_at, started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE workflow_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(workflow_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(map_execution).transpose()
    }

    #[instrument(skip(self))]
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, idempotency_key, status, current_step_order,
                   retry_count, max_retries, input_data, output_data, error_message,
                   scheduled_at, started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(map_execution).collect()
    }

    #[instrument(skip(self, change))]
    async fn transition_execution(
        &self,
        id: Uuid,
        allowed_from: &[ExecutionStatus],
        change: ExecutionChange,
    ) -> Result<Execution, StoreError> {
        for from in allowed_from {
            if !state::execution_transition_allowed(*from, change.to) {
                return Err(StoreError::InvalidTransition {
                    from: *from,
                    to: change.to,
                });
            }
        }

        let from: Vec<String> = allowed_from.iter().map(|s| s.to_string()).collect();

        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2,
                error_message = COALESCE($3, error_message),
                output_data = COALESCE($4, output_data),
                scheduled_at = COALESCE($5, scheduled_at),
                started_at = CASE WHEN $6 THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $7 THEN NOW() ELSE completed_at END,
                retry_count = retry_count + $8,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($9)
            RETURNING id, workflow_id, idempotency_key, status, current_step_order,
                      retry_count, max_retries, input_data, output_data, error_message,
                      scheduled_at, started_at, completed_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(change.to.as_str())
        .bind(&change.error_message)
        .bind(&change.output_data)
        .bind(change.scheduled_at)
        .bind(change.stamp_started)
        .bind(change.stamp_completed)
        .bind(if change.increment_retry { 1i32 } else { 0i32 })
        .bind(&from)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to transition execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => {
                debug!(execution_id = %id, status = %change.to, "transitioned execution");
                map_execution(&row)
            }
            None => {
                // Zero rows: a concurrent transition won; report what it left
                let current = self.get_execution(id).await?;
                Err(StoreError::TransitionConflict {
                    actual: current.status,
                    attempted: change.to,
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn sweep_stuck_running(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'retrying', updated_at = NOW()
            WHERE status = 'running' AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to sweep stuck executions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let reclaimed: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed stuck executions");
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self))]
    async fn list_unclaimed_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM workflow_executions
            WHERE status = 'pending' AND created_at < $1
            "#,
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    #[instrument(skip(self))]
    async fn list_overdue_retrying(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM workflow_executions
            WHERE status = 'retrying'
              AND (scheduled_at IS NULL OR scheduled_at <= NOW())
              AND updated_at < $1
            "#,
        )
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    #[instrument(skip(self, new))]
    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO step_executions (
                id, execution_id, step_id, step_order, status, attempt_number, input_data
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            RETURNING id, execution_id, step_id, step_order, status, attempt_number,
                      input_data, output_data, error_message, error_details,
                      started_at, completed_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.execution_id)
        .bind(new.step_id)
        .bind(new.step_order as i32)
        .bind(new.attempt_number as i32)
        .bind(&new.input_data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create step execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        map_step_execution(&row)
    }

    #[instrument(skip(self))]
    async fn mark_step_running(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            let current = self.step_status(id).await?;
            return Err(StoreError::InvalidStepTransition {
                from: current,
                to: StepStatus::Running,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, output))]
    async fn complete_step(
        &self,
        step_execution_id: Uuid,
        output: Value,
        execution_id: Uuid,
        next_step_order: u32,
    ) -> Result<(), StoreError> {
        // The attempt outcome and the cursor advance commit together
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = 'completed', output_data = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(step_execution_id)
        .bind(&output)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            let current = self.step_status(step_execution_id).await?;
            return Err(StoreError::InvalidStepTransition {
                from: current,
                to: StepStatus::Completed,
            });
        }

        // Cursor is monotone; a stale writer can never move it backwards
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET current_step_order = GREATEST(current_step_order, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(next_step_order as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%execution_id, next_step_order, "checkpointed step completion");
        Ok(())
    }

    #[instrument(skip(self, details))]
    async fn fail_step(
        &self,
        step_execution_id: Uuid,
        message: &str,
        details: Option<Value>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = 'failed', error_message = $2, error_details = $3, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(step_execution_id)
        .bind(message)
        .bind(&details)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            let current = self.step_status(step_execution_id).await?;
            return Err(StoreError::InvalidStepTransition {
                from: current,
                to: StepStatus::Failed,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn max_attempt_number(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(attempt_number), 0) AS max_attempt
            FROM step_executions
            WHERE execution_id = $1 AND step_order = $2
            "#,
        )
        .bind(execution_id)
        .bind(step_order as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.get::<i32, _>("max_attempt") as u32)
    }

    #[instrument(skip(self))]
    async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, step_id, step_order, status, attempt_number,
                   input_data, output_data, error_message, error_details,
                   started_at, completed_at, created_at
            FROM step_executions
            WHERE execution_id = $1
            ORDER BY step_order, attempt_number
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(map_step_execution).collect()
    }

    #[instrument(skip(self))]
    async fn last_completed_output(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT output_data
            FROM step_executions
            WHERE execution_id = $1 AND status = 'completed'
            ORDER BY step_order DESC, attempt_number DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.and_then(|r| r.get("output_data")))
    }

    #[instrument(skip(self, entry))]
    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (execution_id, step_execution_id, level, message, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.execution_id)
        .bind(entry.step_execution_id)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.details)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append log: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_logs(
        &self,
        execution_id: Uuid,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let floor = min_level.unwrap_or(LogLevel::Debug);
        let levels: Vec<String> = [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
        ]
        .into_iter()
        .filter(|l| *l >= floor)
        .map(|l| l.to_string())
        .collect();

        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, step_execution_id, level, message, details, timestamp
            FROM execution_logs
            WHERE execution_id = $1 AND level = ANY($2)
            ORDER BY timestamp, id
            "#,
        )
        .bind(execution_id)
        .bind(&levels)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(map_log).collect()
    }
}

impl PostgresExecutionStore {
    async fn step_status(&self, id: Uuid) -> Result<StepStatus, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status FROM step_executions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::StepExecutionNotFound(id))?;

        parse_step_status(row.get("status"))
    }
}

// Helper functions

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

fn parse_workflow_status(status: &str) -> Result<WorkflowStatus, StoreError> {
    WorkflowStatus::parse(status)
        .ok_or_else(|| StoreError::Database(format!("unknown workflow status: {status}")))
}

fn parse_execution_status(status: &str) -> Result<ExecutionStatus, StoreError> {
    ExecutionStatus::parse(status)
        .ok_or_else(|| StoreError::Database(format!("unknown execution status: {status}")))
}

fn parse_step_status(status: &str) -> Result<StepStatus, StoreError> {
    StepStatus::parse(status)
        .ok_or_else(|| StoreError::Database(format!("unknown step status: {status}")))
}

fn parse_log_level(level: &str) -> Result<LogLevel, StoreError> {
    LogLevel::parse(level)
        .ok_or_else(|| StoreError::Database(format!("unknown log level: {level}")))
}

fn map_workflow(row: &sqlx::postgres::PgRow) -> Result<Workflow, StoreError> {
    let status: String = row.get("status");
    Ok(Workflow {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get::<i32, _>("version") as u32,
        status: parse_workflow_status(&status)?,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_step(row: &sqlx::postgres::PgRow) -> Result<WorkflowStep, StoreError> {
    Ok(WorkflowStep {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        name: row.get("name"),
        task_type: row.get("task_type"),
        step_order: row.get::<i32, _>("step_order") as u32,
        config: row.get("config"),
        timeout_seconds: row.get::<i32, _>("timeout_seconds") as u32,
        max_retries: row.get::<i32, _>("max_retries") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_execution(row: &sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
    let status: String = row.get("status");
    Ok(Execution {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        idempotency_key: row.get("idempotency_key"),
        status: parse_execution_status(&status)?,
        current_step_order: row.get::<i32, _>("current_step_order") as u32,
        retry_count: row.get::<i32, _>("retry_count") as u32,
        max_retries: row.get::<i32, _>("max_retries") as u32,
        input_data: row.get("input_data"),
        output_data: row.get("output_data"),
        error_message: row.get("error_message"),
        scheduled_at: row.get("scheduled_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_step_execution(row: &sqlx::postgres::PgRow) -> Result<StepExecution, StoreError> {
    let status: String = row.get("status");
    Ok(StepExecution {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        step_id: row.get("step_id"),
        step_order: row.get::<i32, _>("step_order") as u32,
        status: parse_step_status(&status)?,
        attempt_number: row.get::<i32, _>("attempt_number") as u32,
        input_data: row.get("input_data"),
        output_data: row.get("output_data"),
        error_message: row.get("error_message"),
        error_details: row.get("error_details"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
    })
}

fn map_log(row: &sqlx::postgres::PgRow) -> Result<LogEntry, StoreError> {
    let level: String = row.get("level");
    Ok(LogEntry {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        step_execution_id: row.get("step_execution_id"),
        level: parse_log_level(&level)?,
        message: row.get("message"),
        details: row.get("details"),
        timestamp: row.get("timestamp"),
    })
}
