//! Caller-visible error taxonomy
//!
//! Service-layer operations translate store, queue and handler faults into
//! these stable kinds. Inside the orchestrator, handler faults are consumed
//! as step outcomes and never surface here; infrastructure faults do.

use uuid::Uuid;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Stable error kinds surfaced to API callers
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Uniqueness or idempotency violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// The state machine rejected a transition
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Trigger against a workflow that is not `active`
    #[error("workflow {0} is not active")]
    WorkflowNotActive(Uuid),

    /// No handler registered for a task type; fatal, never retried
    #[error("no handler registered for task type: {0}")]
    HandlerMissing(String),

    /// Step list violates the dense-prefix invariant
    #[error("workflow definition corrupt: {0}")]
    DefinitionCorrupt(String),

    /// Durable store infrastructure fault; the attempt aborts without a
    /// state rewrite and lease expiry recovers
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Queue infrastructure fault
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(id) => Self::NotFound {
                entity: "workflow",
                id,
            },
            StoreError::ExecutionNotFound(id) => Self::NotFound {
                entity: "execution",
                id,
            },
            StoreError::StepExecutionNotFound(id) => Self::NotFound {
                entity: "step execution",
                id,
            },
            StoreError::DuplicateWorkflow { name, version } => {
                Self::Conflict(format!("workflow {name} v{version} already exists"))
            }
            StoreError::DuplicateStep {
                workflow_id,
                step_order,
            } => Self::Conflict(format!(
                "workflow {workflow_id} already has a step at order {step_order}"
            )),
            StoreError::WorkflowNotEditable(id) => {
                Self::Conflict(format!("workflow {id} is no longer a draft"))
            }
            StoreError::WorkflowTransitionConflict { actual, attempted } => Self::Conflict(
                format!("workflow is {actual}, cannot become {attempted}"),
            ),
            StoreError::TransitionConflict { actual, attempted } => Self::InvalidTransition {
                from: actual.to_string(),
                to: attempted.to_string(),
            },
            StoreError::InvalidTransition { from, to } => Self::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            StoreError::InvalidStepTransition { from, to } => Self::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                Self::StoreUnavailable(msg)
            }
        }
    }
}

impl From<QueueError> for EngineError {
    fn from(err: QueueError) -> Self {
        Self::QueueUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionStatus;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let id = Uuid::now_v7();
        let err: EngineError = StoreError::ExecutionNotFound(id).into();
        assert!(matches!(
            err,
            EngineError::NotFound {
                entity: "execution",
                ..
            }
        ));
    }

    #[test]
    fn test_guard_loss_maps_to_invalid_transition() {
        let err: EngineError = StoreError::TransitionConflict {
            actual: ExecutionStatus::Cancelled,
            attempted: ExecutionStatus::Running,
        }
        .into();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_database_fault_maps_to_unavailable() {
        let err: EngineError = StoreError::Database("connection refused".into()).into();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }
}
