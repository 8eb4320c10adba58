//! Engine configuration
//!
//! All tunables in one place, loadable from the environment. Backoff
//! parameters are configuration, never hard-coded at call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::BackoffPolicy;

/// Recognized configuration options
///
/// Every field has a default except the connection strings; `from_env`
/// reads `CONVEYOR_`-prefixed variables (with `DATABASE_URL` / `QUEUE_URL`
/// fallbacks for the connection strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Durable store connection string
    pub db_url: String,

    /// Queue connection string (may equal `db_url` for the table-backed queue)
    pub queue_url: String,

    /// Step-level retry backoff base, seconds
    pub step_retry_base_s: f64,

    /// Step-level retry backoff cap, seconds
    pub step_retry_cap_s: f64,

    /// Execution-level retry backoff base, seconds
    pub exec_retry_base_s: f64,

    /// Execution-level retry backoff cap, seconds
    pub exec_retry_cap_s: f64,

    /// Uniform jitter fraction applied to every backoff delay
    pub retry_jitter_pct: f64,

    /// Worker loops per process
    pub worker_concurrency: usize,

    /// Queue lease duration, seconds
    ///
    /// Must exceed the worst-case step `timeout_seconds` plus one step
    /// backoff cap, or the sweeper may re-enqueue work that is still
    /// progressing.
    pub queue_visibility_s: u64,

    /// Sweeper wake-up interval, seconds
    pub sweeper_interval_s: u64,

    /// Age beyond which a `running` execution counts as stuck, seconds
    pub sweeper_stuck_threshold_s: u64,

    /// Process log filter (tracing `EnvFilter` syntax)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_url: String::new(),
            queue_url: String::new(),
            step_retry_base_s: 1.0,
            step_retry_cap_s: 60.0,
            exec_retry_base_s: 5.0,
            exec_retry_cap_s: 300.0,
            retry_jitter_pct: 0.2,
            worker_concurrency: 4,
            queue_visibility_s: 600,
            sweeper_interval_s: 30,
            sweeper_stuck_threshold_s: 1800,
            log_level: "info".to_string(),
        }
    }
}

/// Configuration loading failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required variable absent
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// Value present but unparseable
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

impl EngineConfig {
    /// Load from the process environment
    ///
    /// `CONVEYOR_DB_URL` (fallback `DATABASE_URL`) and `CONVEYOR_QUEUE_URL`
    /// (fallback: the db url) are required; everything else defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_url = env_var("CONVEYOR_DB_URL")
            .or_else(|| env_var("DATABASE_URL"))
            .ok_or(ConfigError::Missing("CONVEYOR_DB_URL"))?;
        let queue_url = env_var("CONVEYOR_QUEUE_URL")
            .or_else(|| env_var("QUEUE_URL"))
            .unwrap_or_else(|| db_url.clone());

        Ok(Self {
            db_url,
            queue_url,
            step_retry_base_s: parse_var("CONVEYOR_STEP_RETRY_BASE_S", defaults.step_retry_base_s)?,
            step_retry_cap_s: parse_var("CONVEYOR_STEP_RETRY_CAP_S", defaults.step_retry_cap_s)?,
            exec_retry_base_s: parse_var("CONVEYOR_EXEC_RETRY_BASE_S", defaults.exec_retry_base_s)?,
            exec_retry_cap_s: parse_var("CONVEYOR_EXEC_RETRY_CAP_S", defaults.exec_retry_cap_s)?,
            retry_jitter_pct: parse_var("CONVEYOR_RETRY_JITTER_PCT", defaults.retry_jitter_pct)?,
            worker_concurrency: parse_var(
                "CONVEYOR_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            queue_visibility_s: parse_var(
                "CONVEYOR_QUEUE_VISIBILITY_S",
                defaults.queue_visibility_s,
            )?,
            sweeper_interval_s: parse_var(
                "CONVEYOR_SWEEPER_INTERVAL_S",
                defaults.sweeper_interval_s,
            )?,
            sweeper_stuck_threshold_s: parse_var(
                "CONVEYOR_SWEEPER_STUCK_THRESHOLD_S",
                defaults.sweeper_stuck_threshold_s,
            )?,
            log_level: env_var("CONVEYOR_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Backoff policy for retries of a single step
    pub fn step_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_secs(
            self.step_retry_base_s,
            self.step_retry_cap_s,
            self.retry_jitter_pct,
        )
    }

    /// Backoff policy for retries of a whole execution
    pub fn execution_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_secs(
            self.exec_retry_base_s,
            self.exec_retry_cap_s,
            self.retry_jitter_pct,
        )
    }

    pub fn queue_visibility(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_s)
    }

    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper_interval_s)
    }

    pub fn sweeper_stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.sweeper_stuck_threshold_s)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.step_retry_base_s, 1.0);
        assert_eq!(config.step_retry_cap_s, 60.0);
        assert_eq!(config.exec_retry_base_s, 5.0);
        assert_eq!(config.exec_retry_cap_s, 300.0);
        assert_eq!(config.retry_jitter_pct, 0.2);
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.queue_visibility_s, 600);
        assert_eq!(config.sweeper_interval_s, 30);
        assert_eq!(config.sweeper_stuck_threshold_s, 1800);
    }

    #[test]
    fn test_backoff_policies_from_config() {
        let config = EngineConfig {
            step_retry_base_s: 0.5,
            retry_jitter_pct: 0.0,
            ..Default::default()
        };

        let step = config.step_backoff();
        assert_eq!(step.delay(1), Duration::from_millis(500));

        let exec = config.execution_backoff();
        assert_eq!(exec.delay(1), Duration::from_secs(5));
    }
}
