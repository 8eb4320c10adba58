//! Built-in task handlers
//!
//! Small, dependency-free handlers for the common plumbing steps of a
//! workflow. Anything heavier (outbound HTTP, conditionals) belongs in a
//! deployment-specific handler crate registered the same way.

use async_trait::async_trait;
use conveyor_engine::handler::{HandlerError, HandlerRegistry, TaskHandler};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Register every built-in handler
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(DelayHandler));
    registry.register(Arc::new(LogHandler));
    registry.register(Arc::new(TransformHandler));
}

/// `delay`: sleep for `config.seconds`, pass input through unchanged
///
/// The sleep still runs under the step's `timeout_seconds`; a delay longer
/// than the step timeout fails the attempt.
pub struct DelayHandler;

#[async_trait]
impl TaskHandler for DelayHandler {
    fn task_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, config: &Value, input: Value) -> Result<Value, HandlerError> {
        let seconds = config
            .get("seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::fatal("delay requires a numeric 'seconds' field"))?;
        if seconds < 0.0 {
            return Err(HandlerError::fatal("'seconds' must not be negative"));
        }

        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(input)
    }
}

/// `log`: emit `config.message` to the process log, pass input through
pub struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    fn task_type(&self) -> &str {
        "log"
    }

    async fn execute(&self, config: &Value, input: Value) -> Result<Value, HandlerError> {
        let message = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");

        tracing::info!(target: "conveyor::steps", "{}", message);
        Ok(input)
    }
}

/// `transform`: shape the carried data
///
/// Config:
/// - `set`: object merged into the data (overwrites existing keys)
/// - `drop`: array of top-level keys to remove
///
/// Requires the carried data to be a JSON object.
pub struct TransformHandler;

#[async_trait]
impl TaskHandler for TransformHandler {
    fn task_type(&self) -> &str {
        "transform"
    }

    async fn execute(&self, config: &Value, input: Value) -> Result<Value, HandlerError> {
        let mut object = match input {
            Value::Object(map) => map,
            other => {
                return Err(HandlerError::fatal(format!(
                    "transform requires an object input, got {}",
                    type_name(&other)
                )))
            }
        };

        if let Some(Value::Object(set)) = config.get("set") {
            for (key, value) in set {
                object.insert(key.clone(), value.clone());
            }
        }

        if let Some(Value::Array(drop)) = config.get("drop") {
            for key in drop.iter().filter_map(Value::as_str) {
                object.remove(key);
            }
        }

        Ok(Value::Object(object))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
