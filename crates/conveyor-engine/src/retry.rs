//! Backoff policy for step and execution retries
//!
//! Truncated exponential backoff with uniform jitter to avoid thundering
//! herd on recovery.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Truncated exponential backoff
///
/// `delay(n) = min(cap, base * 2^(n-1))` for the n-th retry (1-based),
/// with a uniform jitter of `+/- jitter * delay` applied on top.
///
/// # Example
///
/// ```
/// use conveyor_engine::retry::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::step_default().with_jitter(0.0);
///
/// assert_eq!(policy.delay(1), Duration::from_secs(1));
/// assert_eq!(policy.delay(2), Duration::from_secs(2));
/// assert_eq!(policy.delay(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base: Duration,

    /// Upper bound on any single delay
    #[serde(with = "duration_millis")]
    pub cap: Duration,

    /// Jitter factor (0.0-1.0); 0.2 means +/- 20% randomness
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Defaults for retries of a single step within an execution attempt
    ///
    /// - 1 second base
    /// - 60 second cap
    /// - 20% jitter
    pub fn step_default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: 0.2,
        }
    }

    /// Defaults for retries of a whole execution attempt
    ///
    /// - 5 second base
    /// - 300 second cap
    /// - 20% jitter
    pub fn execution_default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(300),
            jitter: 0.2,
        }
    }

    /// Create a policy from fractional seconds
    pub fn from_secs(base_s: f64, cap_s: f64, jitter: f64) -> Self {
        Self {
            base: Duration::from_secs_f64(base_s.max(0.0)),
            cap: Duration::from_secs_f64(cap_s.max(0.0)),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Set the base delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the n-th retry (1-based)
    ///
    /// `n = 0` is the initial attempt and carries no delay.
    pub fn delay(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }

        let exp = self.base.as_secs_f64() * 2f64.powi(n as i32 - 1);
        let capped = exp.min(self.cap.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_defaults() {
        let policy = BackoffPolicy::step_default();
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.cap, Duration::from_secs(60));
        assert_eq!(policy.jitter, 0.2);
    }

    #[test]
    fn test_execution_defaults() {
        let policy = BackoffPolicy::execution_default();
        assert_eq!(policy.base, Duration::from_secs(5));
        assert_eq!(policy.cap, Duration::from_secs(300));
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy::step_default().with_jitter(0.0);

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_cap() {
        let policy = BackoffPolicy::step_default()
            .with_cap(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::step_default().with_jitter(0.2);

        for _ in 0..100 {
            let d = policy.delay(3).as_secs_f64();
            // 4s +/- 20%
            assert!(d >= 3.2 && d <= 4.8, "delay {} out of jitter bounds", d);
        }
    }

    #[test]
    fn test_jitter_clamped() {
        let policy = BackoffPolicy::step_default().with_jitter(7.0);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_serialization() {
        let policy = BackoffPolicy::execution_default().with_jitter(0.1);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: BackoffPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
