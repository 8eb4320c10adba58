//! End-to-end engine scenarios over the in-memory store and queue
//!
//! Each test drives the public surface the way a deployment would: define
//! and activate a workflow, trigger executions, run them through the
//! orchestrator (directly or via the worker pool) and assert on the
//! durable state left behind.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use conveyor_engine::model::NewStep;
use conveyor_engine::prelude::*;
use conveyor_worker::register_builtin;

/// Fails with a retryable error for the first `failures` calls, then
/// succeeds echoing its input
struct Flaky {
    failures: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
        })
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
        self.failures
            .store(remaining.saturating_sub(1), Ordering::SeqCst);
        Err(HandlerError::retryable("simulated transient fault"))
    }
}

/// Hangs forever on the first call, instant afterwards; lets tests kill a
/// worker mid-step and then resume cleanly
struct HangsOnce {
    hung: AtomicBool,
}

impl HangsOnce {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hung: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl TaskHandler for HangsOnce {
    fn task_type(&self) -> &str {
        "hangs_once"
    }

    async fn execute(&self, _config: &Value, input: Value) -> Result<Value, HandlerError> {
        if !self.hung.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        Ok(input)
    }
}

struct Rig {
    store: Arc<InMemoryExecutionStore>,
    queue: Arc<InMemoryTaskQueue>,
    orchestrator: Arc<Orchestrator>,
    workflows: WorkflowService,
    executions: ExecutionService,
    config: EngineConfig,
}

fn rig(extra_handlers: Vec<Arc<dyn TaskHandler>>) -> Rig {
    let store = Arc::new(InMemoryExecutionStore::new());
    let queue = Arc::new(InMemoryTaskQueue::new());

    let mut registry = HandlerRegistry::new();
    register_builtin(&mut registry);
    for handler in extra_handlers {
        registry.register(handler);
    }

    let config = EngineConfig {
        step_retry_base_s: 0.001,
        step_retry_cap_s: 0.002,
        exec_retry_base_s: 0.001,
        exec_retry_cap_s: 0.002,
        retry_jitter_pct: 0.0,
        sweeper_stuck_threshold_s: 0,
        ..Default::default()
    };

    let store_dyn: Arc<dyn ExecutionStore> = Arc::clone(&store) as Arc<dyn ExecutionStore>;
    let queue_dyn: Arc<dyn TaskQueue> = Arc::clone(&queue) as Arc<dyn TaskQueue>;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store_dyn),
        Arc::clone(&queue_dyn),
        Arc::new(registry),
        &config,
    ));

    Rig {
        workflows: WorkflowService::new(Arc::clone(&store_dyn)),
        executions: ExecutionService::new(store_dyn, queue_dyn),
        store,
        queue,
        orchestrator,
        config,
    }
}

/// (name, task_type, config, timeout_seconds, max_retries)
type StepSpec = (&'static str, &'static str, Value, u32, u32);

async fn active_workflow(rig: &Rig, steps: &[StepSpec]) -> Uuid {
    let workflow = rig
        .workflows
        .create_workflow("scenario", 1, json!({}))
        .await
        .unwrap();

    for (order, (name, task_type, config, timeout, max_retries)) in steps.iter().enumerate() {
        rig.workflows
            .add_step(NewStep {
                workflow_id: workflow.id,
                name: name.to_string(),
                task_type: task_type.to_string(),
                step_order: order as u32,
                config: config.clone(),
                timeout_seconds: *timeout,
                max_retries: *max_retries,
            })
            .await
            .unwrap();
    }

    rig.workflows.activate(workflow.id).await.unwrap();
    workflow.id
}

fn completed_attempts(attempts: &[StepExecution], step_order: u32) -> usize {
    attempts
        .iter()
        .filter(|a| a.step_order == step_order && a.status == StepStatus::Completed)
        .count()
}

/// S1: a two-step workflow runs to completion with both steps checkpointed
#[tokio::test]
async fn scenario_happy_path() {
    let r = rig(vec![]);
    let workflow_id = active_workflow(
        &r,
        &[
            ("wait", "delay", json!({"seconds": 0}), 5, 0),
            ("announce", "log", json!({"message": "ok"}), 5, 0),
        ],
    )
    .await;

    let execution = r
        .executions
        .trigger(workflow_id, "k1", json!({}), 0)
        .await
        .unwrap();

    let outcome = r.orchestrator.run(execution.id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let execution = r.executions.get(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_step_order, 2);
    assert_eq!(execution.output_data, Some(json!({})));

    let attempts = r.store.list_step_executions(execution.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.status == StepStatus::Completed));

    // The audit trail is ordered and has the lifecycle markers
    let logs = r.executions.list_logs(execution.id, None).await.unwrap();
    assert!(logs
        .windows(2)
        .all(|w| (w[0].timestamp, w[0].id) <= (w[1].timestamp, w[1].id)));
    assert!(logs.iter().any(|l| l.message == "execution started"));
    assert!(logs.iter().any(|l| l.message == "execution completed"));
}

/// S2: concurrent triggers with one idempotency key share one execution
#[tokio::test]
async fn scenario_idempotent_trigger() {
    let r = rig(vec![]);
    let workflow_id = active_workflow(
        &r,
        &[("wait", "delay", json!({"seconds": 0}), 5, 0)],
    )
    .await;

    let (a, b) = tokio::join!(
        r.executions.trigger(workflow_id, "k2", json!({}), 0),
        r.executions.trigger(workflow_id, "k2", json!({}), 0),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    assert_eq!(r.executions.list(workflow_id).await.unwrap().len(), 1);
}

/// S3: a step that fails twice retryably succeeds on its third attempt
#[tokio::test]
async fn scenario_retryable_step() {
    let r = rig(vec![Flaky::new(2)]);
    let workflow_id = active_workflow(&r, &[("shaky", "flaky", json!({}), 5, 3)]).await;

    let execution = r
        .executions
        .trigger(workflow_id, "k3", json!({"payload": 1}), 0)
        .await
        .unwrap();

    let outcome = r.orchestrator.run(execution.id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let attempts = r.store.list_step_executions(execution.id).await.unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        attempts.iter().map(|a| a.status).collect::<Vec<_>>(),
        vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
    );
}

/// S4: step and execution budgets exhausted; failure is terminal and the
/// handler error lands in `error_message`
#[tokio::test]
async fn scenario_exhausted_retries() {
    let r = rig(vec![Flaky::new(u32::MAX)]);
    let workflow_id = active_workflow(&r, &[("doomed", "flaky", json!({}), 5, 1)]).await;

    let execution = r
        .executions
        .trigger(workflow_id, "k4", json!({}), 0)
        .await
        .unwrap();

    let outcome = r.orchestrator.run(execution.id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed);

    let execution = r.executions.get(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error_message.as_deref(),
        Some("simulated transient fault")
    );

    // Initial attempt plus one retry
    let attempts = r.store.list_step_executions(execution.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts.last().unwrap().attempt_number, 2);
    assert!(attempts.iter().all(|a| a.status == StepStatus::Failed));
}

/// S5: a worker dies mid-step; the sweeper reclaims the execution and a
/// second run resumes from the checkpoint without re-running step 0
#[tokio::test]
async fn scenario_crash_and_resume() {
    let r = rig(vec![HangsOnce::new()]);
    let workflow_id = active_workflow(
        &r,
        &[
            ("first", "delay", json!({"seconds": 0}), 600, 0),
            ("second", "hangs_once", json!({}), 600, 0),
            ("third", "log", json!({"message": "done"}), 600, 0),
        ],
    )
    .await;

    let execution = r
        .executions
        .trigger(workflow_id, "k5", json!({"carry": 9}), 1)
        .await
        .unwrap();
    let execution_id = execution.id;

    // First worker: run until it is wedged inside step 1, then kill it
    let orchestrator = Arc::clone(&r.orchestrator);
    let doomed = tokio::spawn(async move { orchestrator.run(execution_id).await });

    let wedged = async {
        loop {
            let attempts = r.store.list_step_executions(execution_id).await.unwrap();
            if attempts
                .iter()
                .any(|a| a.step_order == 1 && a.status == StepStatus::Running)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wedged)
        .await
        .expect("worker never reached step 1");
    doomed.abort();
    let _ = doomed.await;

    // Checkpoint survived the crash
    let execution = r.executions.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.current_step_order, 1);

    // Crash recovery
    let sweeper = Sweeper::new(
        Arc::clone(&r.store) as Arc<dyn ExecutionStore>,
        Arc::clone(&r.queue) as Arc<dyn TaskQueue>,
        &r.config,
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.stuck, 1);

    // Second worker resumes at the cursor and finishes
    let outcome = r.orchestrator.run(execution_id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let execution = r.executions.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_step_order, 3);
    assert_eq!(execution.output_data, Some(json!({"carry": 9})));

    let attempts = r.store.list_step_executions(execution_id).await.unwrap();
    assert_eq!(completed_attempts(&attempts, 0), 1);
    assert_eq!(completed_attempts(&attempts, 1), 1);
    assert_eq!(completed_attempts(&attempts, 2), 1);
}

/// S6: cancel lands while step 1 runs; the in-flight step finishes but
/// nothing new starts and the execution settles cancelled
#[tokio::test]
async fn scenario_cancellation() {
    let r = rig(vec![]);
    let workflow_id = active_workflow(
        &r,
        &[
            ("first", "delay", json!({"seconds": 0}), 600, 0),
            ("second", "delay", json!({"seconds": 0.1}), 600, 0),
            ("third", "delay", json!({"seconds": 0}), 600, 0),
        ],
    )
    .await;

    let execution = r
        .executions
        .trigger(workflow_id, "k6", json!({}), 0)
        .await
        .unwrap();
    let execution_id = execution.id;

    let orchestrator = Arc::clone(&r.orchestrator);
    let running = tokio::spawn(async move { orchestrator.run(execution_id).await });

    // Wait until step 1 is in flight, then cancel
    let in_step_one = async {
        loop {
            let attempts = r.store.list_step_executions(execution_id).await.unwrap();
            if attempts
                .iter()
                .any(|a| a.step_order == 1 && a.status == StepStatus::Running)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), in_step_one)
        .await
        .expect("execution never reached step 1");
    r.executions.cancel(execution_id).await.unwrap();

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);

    let execution = r.executions.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.current_step_order >= 1 && execution.current_step_order <= 2);

    // Nothing started after the cancel was observed
    let attempts = r.store.list_step_executions(execution_id).await.unwrap();
    assert!(attempts.iter().all(|a| a.step_order <= 1));

    let logs = r.executions.list_logs(execution_id, None).await.unwrap();
    assert!(logs.iter().any(|l| l.message.contains("cancellation")));
}

/// An execution-level retry travels through the delayed queue and a worker
/// pool picks it up and completes it
#[tokio::test]
async fn scenario_execution_retry_through_queue() {
    let r = rig(vec![Flaky::new(1)]);
    let workflow_id = active_workflow(&r, &[("shaky", "flaky", json!({}), 5, 0)]).await;

    let pool = WorkerPool::start(
        Arc::clone(&r.orchestrator),
        Arc::clone(&r.queue) as Arc<dyn TaskQueue>,
        WorkerPoolConfig::default().with_concurrency(2),
    );

    let execution = r
        .executions
        .trigger(workflow_id, "k7", json!({}), 1)
        .await
        .unwrap();

    // First delivery fails the step (no step budget) and schedules an
    // execution retry; the delayed message brings it back and it succeeds
    let settled = async {
        loop {
            let execution = r.executions.get(execution.id).await.unwrap();
            if execution.status == ExecutionStatus::Completed {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let execution = tokio::time::timeout(Duration::from_secs(5), settled)
        .await
        .expect("execution never completed");

    assert_eq!(execution.retry_count, 1);

    let attempts = r.store.list_step_executions(execution.id).await.unwrap();
    // One failed attempt from the first delivery, one completed from the
    // retry; both are attempt rows of step 0
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2]
    );

    pool.shutdown().await.unwrap();
}
