//! Workflow definitions and their steps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workflow definition
///
/// Only `active` workflows admit new executions. Steps are mutable only
/// while the workflow is `draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Definition is being assembled; steps may still change
    Draft,

    /// Definition is frozen and admits executions
    Active,

    /// No new executions; existing ones run to completion
    Deprecated,

    /// Retired definition kept for audit
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, versioned workflow definition
///
/// `(name, version)` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub status: WorkflowStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a workflow (starts in `draft`)
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub version: u32,
    pub metadata: serde_json::Value,
}

/// One typed task within a workflow
///
/// `(workflow_id, step_order)` is unique; the orchestrator additionally
/// requires step orders to form a dense prefix 0..n when it builds the
/// execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,

    /// Keys into the handler registry
    pub task_type: String,

    pub step_order: u32,

    /// Handler-specific configuration, validated by the handler itself
    pub config: serde_json::Value,

    /// Upper bound on a single handler invocation
    pub timeout_seconds: u32,

    /// Retry budget for this step within one execution attempt
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for appending a step to a draft workflow
#[derive(Debug, Clone)]
pub struct NewStep {
    pub workflow_id: Uuid,
    pub name: String,
    pub task_type: String,
    pub step_order: u32,
    pub config: serde_json::Value,
    pub timeout_seconds: u32,
    pub max_retries: u32,
}
