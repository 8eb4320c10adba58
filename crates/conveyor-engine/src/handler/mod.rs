//! Task handler capability and registry
//!
//! A handler performs the work of one step, selected by `task_type`.
//! Handlers are pure with respect to engine state; any external state is
//! their own concern. The orchestrator bounds every invocation with the
//! step's `timeout_seconds`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Failure reported by a handler
///
/// `Retryable` signals a transient fault the engine may retry within the
/// step's budget; `Fatal` short-circuits straight to execution-level
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Transient fault; eligible for a step-level retry
    Retryable {
        message: String,
        details: Option<Value>,
    },

    /// Permanent fault; no further attempts at this step
    Fatal {
        message: String,
        details: Option<Value>,
    },
}

impl HandlerError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            details: None,
        }
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details
    pub fn with_details(self, details: Value) -> Self {
        match self {
            Self::Retryable { message, .. } => Self::Retryable {
                message,
                details: Some(details),
            },
            Self::Fatal { message, .. } => Self::Fatal {
                message,
                details: Some(details),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message, .. } | Self::Fatal { message, .. } => message,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Retryable { details, .. } | Self::Fatal { details, .. } => details.as_ref(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// A unit of step work, looked up by `task_type`
///
/// # Example
///
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl TaskHandler for SendEmail {
///     fn task_type(&self) -> &str {
///         "send_email"
///     }
///
///     async fn execute(&self, config: &Value, input: Value) -> Result<Value, HandlerError> {
///         // deliver...
///         Ok(input)
///     }
/// }
/// ```
///
/// # Errors
///
/// Return [`HandlerError::retryable`] for transient failures and
/// [`HandlerError::fatal`] for permanent ones.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Registry key for this handler
    fn task_type(&self) -> &str;

    /// Perform the step's work
    ///
    /// `config` is the step's handler configuration; `input` is the data
    /// carried from the previous step (or the execution input for step 0).
    /// The returned value becomes the input of the next step.
    async fn execute(&self, config: &Value, input: Value) -> Result<Value, HandlerError>;
}

/// Lookup table from `task_type` to handler
///
/// Populated once at startup; lookups are O(1).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own `task_type`
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    /// Look up a handler by task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).map(Arc::clone)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered task types
    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
