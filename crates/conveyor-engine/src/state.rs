//! Pure lifecycle state machines
//!
//! Validates `(current, proposed)` transition pairs for executions and
//! step executions. This module holds no I/O; the stores consult it on
//! every persisted status write and the rejected pair leaves state
//! untouched.

use crate::model::{ExecutionStatus, StepStatus};

/// Check whether an execution may move from `current` to `proposed`.
///
/// The allowed set:
///
/// ```text
/// pending   -> running | cancelled
/// running   -> completed | failed | cancelled | retrying
/// failed    -> retrying | cancelled
/// retrying  -> running | cancelled
/// completed -> (terminal)
/// cancelled -> (terminal)
/// ```
///
/// `running -> retrying` is reserved for the sweeper reclaiming work from
/// a crashed worker; it does not consume the retry budget. Budget checks
/// for `failed -> retrying` belong to the caller; this function only
/// answers whether the edge exists.
pub fn execution_transition_allowed(current: ExecutionStatus, proposed: ExecutionStatus) -> bool {
    use ExecutionStatus::*;
    matches!(
        (current, proposed),
        (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Running, Retrying)
            | (Failed, Retrying)
            | (Failed, Cancelled)
            | (Retrying, Running)
            | (Retrying, Cancelled)
    )
}

/// Check whether a step attempt may move from `current` to `proposed`.
///
/// Per attempt: `pending -> running -> {completed | failed | skipped}`.
/// A retry is a *new* attempt row, never a transition out of `failed`.
pub fn step_transition_allowed(current: StepStatus, proposed: StepStatus) -> bool {
    use StepStatus::*;
    matches!(
        (current, proposed),
        (Pending, Running) | (Running, Completed) | (Running, Failed) | (Running, Skipped)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionStatus::*;

    const ALL: [ExecutionStatus; 6] = [Pending, Running, Completed, Failed, Retrying, Cancelled];

    #[test]
    fn test_terminal_states_admit_nothing() {
        for to in ALL {
            assert!(!execution_transition_allowed(Completed, to));
            assert!(!execution_transition_allowed(Cancelled, to));
        }
    }

    #[test]
    fn test_pending_edges() {
        assert!(execution_transition_allowed(Pending, Running));
        assert!(execution_transition_allowed(Pending, Cancelled));
        assert!(!execution_transition_allowed(Pending, Completed));
        assert!(!execution_transition_allowed(Pending, Failed));
        assert!(!execution_transition_allowed(Pending, Retrying));
    }

    #[test]
    fn test_running_edges() {
        assert!(execution_transition_allowed(Running, Completed));
        assert!(execution_transition_allowed(Running, Failed));
        assert!(execution_transition_allowed(Running, Cancelled));
        assert!(execution_transition_allowed(Running, Retrying));
        assert!(!execution_transition_allowed(Running, Pending));
    }

    #[test]
    fn test_failed_and_retrying_edges() {
        assert!(execution_transition_allowed(Failed, Retrying));
        assert!(execution_transition_allowed(Failed, Cancelled));
        assert!(!execution_transition_allowed(Failed, Running));
        assert!(!execution_transition_allowed(Failed, Completed));

        assert!(execution_transition_allowed(Retrying, Running));
        assert!(execution_transition_allowed(Retrying, Cancelled));
        assert!(!execution_transition_allowed(Retrying, Failed));
        assert!(!execution_transition_allowed(Retrying, Completed));
    }

    #[test]
    fn test_no_self_transitions() {
        for status in ALL {
            assert!(!execution_transition_allowed(status, status));
        }
    }

    #[test]
    fn test_step_attempt_edges() {
        use StepStatus::*;
        assert!(step_transition_allowed(Pending, Running));
        assert!(step_transition_allowed(Running, Completed));
        assert!(step_transition_allowed(Running, Failed));
        assert!(step_transition_allowed(Running, Skipped));

        assert!(!step_transition_allowed(Pending, Completed));
        assert!(!step_transition_allowed(Failed, Running));
        assert!(!step_transition_allowed(Completed, Failed));
        assert!(!step_transition_allowed(Failed, Completed));
    }
}
