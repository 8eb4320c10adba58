//! Orchestrator: drive one execution to a settled state
//!
//! Loads the workflow definition, iterates steps from the execution's
//! cursor, invokes handlers through the registry, applies retry policy and
//! checkpoints progress after every step. All status writes are guarded;
//! losing a guard means a concurrent actor (usually `cancel`) won, and the
//! orchestrator concedes instead of fighting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handler::{HandlerError, HandlerRegistry, TaskHandler};
use crate::model::{ExecutionStatus, LogLevel, NewLogEntry, NewStepExecution, WorkflowStep};
use crate::queue::TaskQueue;
use crate::retry::BackoffPolicy;
use crate::store::{ExecutionChange, ExecutionStore, StoreError};

/// How a call to [`Orchestrator::run`] left the execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All steps done; `output_data` recorded
    Completed,

    /// Settled in terminal failure
    Failed,

    /// Failed with budget remaining; a delayed re-delivery is scheduled
    Retrying,

    /// Cancellation observed; in-flight outcome discarded
    Cancelled,

    /// The execution was not in an admissible state (duplicate delivery
    /// or a concurrent worker already owns it); nothing was done
    Skipped,
}

enum StepResult {
    Completed,
    Exhausted(HandlerError),
}

/// Drives executions end-to-end
///
/// One orchestrator is shared by all worker loops of a process; each call
/// to [`run`](Self::run) owns a single execution for its duration.
pub struct Orchestrator {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<HandlerRegistry>,
    step_backoff: BackoffPolicy,
    execution_backoff: BackoffPolicy,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            step_backoff: config.step_backoff(),
            execution_backoff: config.execution_backoff(),
        }
    }

    /// Drive one execution to a settled state
    ///
    /// Admissible starting states are `pending` and `retrying`; any other
    /// state makes this a no-op ([`RunOutcome::Skipped`]), which is what
    /// makes duplicate queue deliveries harmless.
    ///
    /// # Errors
    ///
    /// Only infrastructure faults ([`EngineError::StoreUnavailable`],
    /// [`EngineError::QueueUnavailable`]) and [`EngineError::NotFound`]
    /// propagate; handler faults are consumed as step outcomes.
    #[instrument(skip(self))]
    pub async fn run(&self, execution_id: Uuid) -> Result<RunOutcome, EngineError> {
        let execution = self.store.get_execution(execution_id).await?;
        if !matches!(
            execution.status,
            ExecutionStatus::Pending | ExecutionStatus::Retrying
        ) {
            debug!(status = %execution.status, "execution not admissible; skipping");
            return Ok(RunOutcome::Skipped);
        }

        let execution = match self
            .try_transition(
                execution_id,
                &[ExecutionStatus::Pending, ExecutionStatus::Retrying],
                ExecutionChange::new(ExecutionStatus::Running).stamp_started(),
            )
            .await?
        {
            Some(e) => e,
            None => return self.concede(execution_id).await,
        };

        self.log(
            execution_id,
            None,
            LogLevel::Info,
            "execution started",
            Some(json!({ "attempt": execution.retry_count + 1 })),
        )
        .await?;

        let steps = self.store.list_steps(execution.workflow_id).await?;
        for (position, step) in steps.iter().enumerate() {
            if step.step_order != position as u32 {
                let message = format!(
                    "workflow definition corrupt: expected step order {position}, found {}",
                    step.step_order
                );
                return self.fail_terminal(execution_id, &message).await;
            }
        }

        // The latest completed step's output is the authoritative input to
        // the next step; fresh executions start from the trigger input
        let mut data = self
            .store
            .last_completed_output(execution_id)
            .await?
            .unwrap_or_else(|| execution.input_data.clone());

        let mut index = execution.current_step_order;
        while (index as usize) < steps.len() {
            // Cancellation is observed at step boundaries
            let current = self.store.get_execution(execution_id).await?;
            if current.status == ExecutionStatus::Cancelled {
                self.log(
                    execution_id,
                    None,
                    LogLevel::Info,
                    "cancellation observed; stopping",
                    None,
                )
                .await?;
                return Ok(RunOutcome::Cancelled);
            }

            let step = &steps[index as usize];
            let Some(handler) = self.registry.get(&step.task_type) else {
                warn!(task_type = %step.task_type, "no handler registered");
                let message = format!("no handler registered for task type: {}", step.task_type);
                return self.fail_terminal(execution_id, &message).await;
            };

            match self
                .run_step(execution_id, step, handler, &mut data)
                .await?
            {
                StepResult::Completed => index += 1,
                StepResult::Exhausted(err) => {
                    return self.settle_failure(execution_id, &err).await;
                }
            }
        }

        match self
            .try_transition(
                execution_id,
                &[ExecutionStatus::Running],
                ExecutionChange::new(ExecutionStatus::Completed)
                    .with_output(data)
                    .stamp_completed(),
            )
            .await?
        {
            Some(_) => {
                self.log(
                    execution_id,
                    None,
                    LogLevel::Info,
                    "execution completed",
                    None,
                )
                .await?;
                Ok(RunOutcome::Completed)
            }
            None => self.concede(execution_id).await,
        }
    }

    /// Run one step to success or exhaustion, looping over attempts
    async fn run_step(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        handler: Arc<dyn TaskHandler>,
        data: &mut Value,
    ) -> Result<StepResult, EngineError> {
        loop {
            let attempt_number = self
                .store
                .max_attempt_number(execution_id, step.step_order)
                .await?
                + 1;

            let attempt = self
                .store
                .create_step_execution(NewStepExecution {
                    execution_id,
                    step_id: step.id,
                    step_order: step.step_order,
                    attempt_number,
                    input_data: data.clone(),
                })
                .await?;
            self.store.mark_step_running(attempt.id).await?;

            let timeout = Duration::from_secs(step.timeout_seconds as u64);
            let outcome = match tokio::time::timeout(
                timeout,
                handler.execute(&step.config, data.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HandlerError::retryable(format!(
                    "handler timed out after {}s",
                    step.timeout_seconds
                ))),
            };

            match outcome {
                Ok(output) => {
                    // Step outcome and cursor advance land in one write
                    self.store
                        .complete_step(attempt.id, output.clone(), execution_id, step.step_order + 1)
                        .await?;
                    self.log(
                        execution_id,
                        Some(attempt.id),
                        LogLevel::Debug,
                        format!("step '{}' completed", step.name),
                        Some(json!({ "step_order": step.step_order, "attempt": attempt_number })),
                    )
                    .await?;
                    *data = output;
                    return Ok(StepResult::Completed);
                }
                Err(err) => {
                    self.store
                        .fail_step(attempt.id, err.message(), err.details().cloned())
                        .await?;

                    if err.is_retryable() && attempt_number <= step.max_retries {
                        self.log(
                            execution_id,
                            Some(attempt.id),
                            LogLevel::Warning,
                            format!(
                                "step '{}' attempt {} failed: {}",
                                step.name,
                                attempt_number,
                                err.message()
                            ),
                            Some(json!({ "step_order": step.step_order, "will_retry": true })),
                        )
                        .await?;
                        tokio::time::sleep(self.step_backoff.delay(attempt_number)).await;
                        continue;
                    }

                    self.log(
                        execution_id,
                        Some(attempt.id),
                        LogLevel::Warning,
                        format!(
                            "step '{}' failed with no attempts remaining: {}",
                            step.name,
                            err.message()
                        ),
                        Some(json!({ "step_order": step.step_order, "will_retry": false })),
                    )
                    .await?;
                    return Ok(StepResult::Exhausted(err));
                }
            }
        }
    }

    /// Promote a step failure to the execution level
    async fn settle_failure(
        &self,
        execution_id: Uuid,
        err: &HandlerError,
    ) -> Result<RunOutcome, EngineError> {
        let execution = self.store.get_execution(execution_id).await?;

        if execution.retry_count >= execution.max_retries {
            return self.fail_terminal(execution_id, err.message()).await;
        }

        if self
            .try_transition(
                execution_id,
                &[ExecutionStatus::Running],
                ExecutionChange::new(ExecutionStatus::Failed).with_error(err.message()),
            )
            .await?
            .is_none()
        {
            return self.concede(execution_id).await;
        }

        let retry_number = execution.retry_count + 1;
        let delay = self.execution_backoff.delay(retry_number);
        let scheduled_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        if self
            .try_transition(
                execution_id,
                &[ExecutionStatus::Failed],
                ExecutionChange::new(ExecutionStatus::Retrying)
                    .increment_retry()
                    .scheduled(scheduled_at),
            )
            .await?
            .is_none()
        {
            return self.concede(execution_id).await;
        }

        self.log(
            execution_id,
            None,
            LogLevel::Warning,
            format!(
                "execution failed: {}; retry {} of {} scheduled",
                err.message(),
                retry_number,
                execution.max_retries
            ),
            Some(json!({ "scheduled_at": scheduled_at })),
        )
        .await?;

        // The row already carries the retry state; a lost enqueue is
        // recovered by the sweeper
        if let Err(e) = self.queue.enqueue(execution_id, Some(scheduled_at)).await {
            warn!(%execution_id, "delayed enqueue failed, sweeper will recover: {}", e);
        }

        Ok(RunOutcome::Retrying)
    }

    /// Settle in terminal failure, ignoring any remaining retry budget
    async fn fail_terminal(
        &self,
        execution_id: Uuid,
        message: &str,
    ) -> Result<RunOutcome, EngineError> {
        if self
            .try_transition(
                execution_id,
                &[ExecutionStatus::Running],
                ExecutionChange::new(ExecutionStatus::Failed)
                    .with_error(message)
                    .stamp_completed(),
            )
            .await?
            .is_none()
        {
            return self.concede(execution_id).await;
        }

        self.log(
            execution_id,
            None,
            LogLevel::Error,
            format!("execution failed: {message}"),
            None,
        )
        .await?;
        Ok(RunOutcome::Failed)
    }

    /// Attempt a guarded transition; `None` means the guard lost a race
    async fn try_transition(
        &self,
        execution_id: Uuid,
        allowed_from: &[ExecutionStatus],
        change: ExecutionChange,
    ) -> Result<Option<crate::model::Execution>, EngineError> {
        match self
            .store
            .transition_execution(execution_id, allowed_from, change)
            .await
        {
            Ok(execution) => Ok(Some(execution)),
            Err(StoreError::TransitionConflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A concurrent transition won; find out who and yield accordingly
    async fn concede(&self, execution_id: Uuid) -> Result<RunOutcome, EngineError> {
        let current = self.store.get_execution(execution_id).await?;
        if current.status == ExecutionStatus::Cancelled {
            self.log(
                execution_id,
                None,
                LogLevel::Info,
                "cancellation observed; discarding in-flight outcome",
                None,
            )
            .await?;
            return Ok(RunOutcome::Cancelled);
        }

        debug!(status = %current.status, "lost transition race; skipping");
        Ok(RunOutcome::Skipped)
    }

    async fn log(
        &self,
        execution_id: Uuid,
        step_execution_id: Option<Uuid>,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Result<(), EngineError> {
        self.store
            .append_log(NewLogEntry {
                execution_id,
                step_execution_id,
                level,
                message: message.into(),
                details,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskHandler;
    use crate::model::{NewExecution, NewStep, NewWorkflow, StepStatus, WorkflowStatus};
    use crate::queue::InMemoryTaskQueue;
    use crate::store::{Admission, InMemoryExecutionStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        fn task_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, _config: &Value, input: Value) -> Result<Value, HandlerError> {
            Ok(input)
        }
    }

    /// Fails with a retryable error for the first `failures` calls
    struct Flaky {
        failures: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        fn task_type(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _config: &Value, input: Value) -> Result<Value, HandlerError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(input);
            }
            self.failures.store(remaining.saturating_sub(1), Ordering::SeqCst);
            Err(HandlerError::retryable("transient fault"))
        }
    }

    struct Stuck;

    #[async_trait]
    impl TaskHandler for Stuck {
        fn task_type(&self) -> &str {
            "stuck"
        }

        async fn execute(&self, _config: &Value, input: Value) -> Result<Value, HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(input)
        }
    }

    struct Harness {
        store: Arc<InMemoryExecutionStore>,
        queue: Arc<InMemoryTaskQueue>,
        orchestrator: Orchestrator,
    }

    fn harness(handlers: Vec<Arc<dyn TaskHandler>>) -> Harness {
        let store = Arc::new(InMemoryExecutionStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler);
        }
        let config = EngineConfig {
            step_retry_base_s: 0.001,
            step_retry_cap_s: 0.002,
            exec_retry_base_s: 0.001,
            exec_retry_cap_s: 0.002,
            retry_jitter_pct: 0.0,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&store) as Arc<dyn ExecutionStore>,
            Arc::clone(&queue) as Arc<dyn TaskQueue>,
            Arc::new(registry),
            &config,
        );
        Harness {
            store,
            queue,
            orchestrator,
        }
    }

    async fn active_workflow(
        harness: &Harness,
        steps: &[(&str, &str, u32)], // (name, task_type, max_retries)
    ) -> Uuid {
        let workflow = harness
            .store
            .create_workflow(NewWorkflow {
                name: "test".to_string(),
                version: 1,
                metadata: json!({}),
            })
            .await
            .unwrap();

        for (order, (name, task_type, max_retries)) in steps.iter().enumerate() {
            harness
                .store
                .add_step(NewStep {
                    workflow_id: workflow.id,
                    name: name.to_string(),
                    task_type: task_type.to_string(),
                    step_order: order as u32,
                    config: json!({}),
                    timeout_seconds: 1,
                    max_retries: *max_retries,
                })
                .await
                .unwrap();
        }

        harness
            .store
            .set_workflow_status(workflow.id, &[WorkflowStatus::Draft], WorkflowStatus::Active)
            .await
            .unwrap();
        workflow.id
    }

    async fn admit(harness: &Harness, workflow_id: Uuid, max_retries: u32) -> Uuid {
        let admission = harness
            .store
            .insert_execution(NewExecution {
                workflow_id,
                idempotency_key: "k".to_string(),
                input_data: json!({ "seed": true }),
                max_retries,
            })
            .await
            .unwrap();
        match admission {
            Admission::Created(e) => e.id,
            Admission::Existing(e) => e.id,
        }
    }

    #[tokio::test]
    async fn test_two_steps_complete() {
        let h = harness(vec![Arc::new(Echo)]);
        let workflow_id = active_workflow(&h, &[("a", "echo", 0), ("b", "echo", 0)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.current_step_order, 2);
        assert_eq!(execution.output_data, Some(json!({ "seed": true })));
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_noops() {
        let h = harness(vec![Arc::new(Echo)]);
        let workflow_id = active_workflow(&h, &[("a", "echo", 0)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        assert_eq!(
            h.orchestrator.run(execution_id).await.unwrap(),
            RunOutcome::Completed
        );
        assert_eq!(
            h.orchestrator.run(execution_id).await.unwrap(),
            RunOutcome::Skipped
        );

        // No extra attempts were recorded
        let attempts = h.store.list_step_executions(execution_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_step_retries_then_succeeds() {
        let h = harness(vec![Arc::new(Flaky::new(2))]);
        let workflow_id = active_workflow(&h, &[("only", "flaky", 3)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let attempts = h.store.list_step_executions(execution_id).await.unwrap();
        let statuses: Vec<_> = attempts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
        );
        let numbers: Vec<_> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exhausted_step_fails_execution() {
        let h = harness(vec![Arc::new(Flaky::new(u32::MAX))]);
        let workflow_id = active_workflow(&h, &[("only", "flaky", 1)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_message.as_deref(), Some("transient fault"));
        assert!(execution.completed_at.is_some());

        // Initial attempt plus one retry
        let attempts = h.store.list_step_executions(execution_id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts.last().unwrap().attempt_number, 2);
    }

    #[tokio::test]
    async fn test_execution_retry_scheduled() {
        let h = harness(vec![Arc::new(Flaky::new(u32::MAX))]);
        let workflow_id = active_workflow(&h, &[("only", "flaky", 0)]).await;
        let execution_id = admit(&h, workflow_id, 2).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Retrying);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Retrying);
        assert_eq!(execution.retry_count, 1);
        assert!(execution.scheduled_at.is_some());
        assert!(execution.completed_at.is_none());

        // The delayed re-delivery is in the queue
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        struct Fatal;

        #[async_trait]
        impl TaskHandler for Fatal {
            fn task_type(&self) -> &str {
                "fatal"
            }

            async fn execute(&self, _c: &Value, _i: Value) -> Result<Value, HandlerError> {
                Err(HandlerError::fatal("bad config"))
            }
        }

        let h = harness(vec![Arc::new(Fatal)]);
        // Generous step budget: a fatal error must not consume it
        let workflow_id = active_workflow(&h, &[("only", "fatal", 5)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let attempts = h.store.list_step_executions(execution_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_is_terminal() {
        let h = harness(vec![]);
        let workflow_id = active_workflow(&h, &[("only", "nonexistent", 0)]).await;
        // Execution budget must be ignored for a missing handler
        let execution_id = admit(&h, workflow_id, 5).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .error_message
            .unwrap()
            .contains("no handler registered"));
        assert_eq!(execution.retry_count, 0);
    }

    #[tokio::test]
    async fn test_sparse_step_orders_are_corrupt() {
        let h = harness(vec![Arc::new(Echo)]);
        let workflow = h
            .store
            .create_workflow(NewWorkflow {
                name: "gappy".to_string(),
                version: 1,
                metadata: json!({}),
            })
            .await
            .unwrap();
        // Step orders 0 and 2: a gap
        for order in [0u32, 2u32] {
            h.store
                .add_step(NewStep {
                    workflow_id: workflow.id,
                    name: format!("s{order}"),
                    task_type: "echo".to_string(),
                    step_order: order,
                    config: json!({}),
                    timeout_seconds: 1,
                    max_retries: 0,
                })
                .await
                .unwrap();
        }
        h.store
            .set_workflow_status(workflow.id, &[WorkflowStatus::Draft], WorkflowStatus::Active)
            .await
            .unwrap();
        let execution_id = admit(&h, workflow.id, 3).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert!(execution
            .error_message
            .unwrap()
            .contains("definition corrupt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_is_retryable() {
        let h = harness(vec![Arc::new(Stuck)]);
        let workflow_id = active_workflow(&h, &[("only", "stuck", 0)]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let attempts = h.store.list_step_executions(execution_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_workflow_completes_with_input() {
        let h = harness(vec![]);
        let workflow_id = active_workflow(&h, &[]).await;
        let execution_id = admit(&h, workflow_id, 0).await;

        let outcome = h.orchestrator.run(execution_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let execution = h.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.output_data, Some(json!({ "seed": true })));
        assert_eq!(execution.current_step_order, 0);
    }
}
