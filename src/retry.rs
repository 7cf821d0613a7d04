//! Per-node retry policies with exponential backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::node::NodeError;

/// Which errors a policy considers retryable.
#[derive(Clone)]
pub enum RetryOn {
    /// Only transient errors (see [`NodeError::is_transient`]).
    Transient,
    /// Every error except interrupts.
    All,
    /// Nothing; fail on first error.
    Never,
    /// Caller-supplied classification.
    Predicate(Arc<dyn Fn(&NodeError) -> bool + Send + Sync>),
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Transient => write!(f, "Transient"),
            RetryOn::All => write!(f, "All"),
            RetryOn::Never => write!(f, "Never"),
            RetryOn::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Bounded exponential backoff applied to one task's attempts.
///
/// Sleep before attempt `n` (n ≥ 2) is
/// `initial_interval * backoff_factor^(n-2)`, capped at
/// `max_interval`, with optional ±50 % jitter. The attempt *count* is
/// deterministic regardless of jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub jitter: bool,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
            jitter: false,
            retry_on: RetryOn::Never,
        }
    }

    /// Retry transient errors up to `max_attempts` total attempts.
    #[must_use]
    pub fn transient(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
            jitter: true,
            retry_on: RetryOn::Transient,
        }
    }

    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    #[must_use]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Whether `error` warrants another attempt (attempt budget aside).
    #[must_use]
    pub fn should_retry(&self, error: &NodeError) -> bool {
        // Interrupts are control flow, never retried.
        if matches!(error, NodeError::Interrupt { .. }) {
            return false;
        }
        match &self.retry_on {
            RetryOn::Never => false,
            RetryOn::All => true,
            RetryOn::Transient => error.is_transient(),
            RetryOn::Predicate(p) => p(error),
        }
    }

    /// Sleep interval before the given attempt (2-based; attempt 1 has
    /// no preceding sleep).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = base.min(self.max_interval.as_secs_f64());
        let secs = if self.jitter {
            // ±50 % uniform jitter; never affects how many attempts run.
            capped * rand::random_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::transient(5)
            .with_initial_interval(Duration::from_millis(100))
            .with_backoff_factor(2.0)
            .with_max_interval(Duration::from_millis(300));
        let mut no_jitter = policy.clone();
        no_jitter.jitter = false;

        assert_eq!(no_jitter.backoff(1), Duration::ZERO);
        assert_eq!(no_jitter.backoff(2), Duration::from_millis(100));
        assert_eq!(no_jitter.backoff(3), Duration::from_millis(200));
        assert_eq!(no_jitter.backoff(4), Duration::from_millis(300));
        assert_eq!(no_jitter.backoff(5), Duration::from_millis(300));
    }

    #[test]
    fn interrupts_are_never_retried() {
        let policy = RetryPolicy {
            retry_on: RetryOn::All,
            ..RetryPolicy::transient(3)
        };
        let interrupt = NodeError::Interrupt {
            payload: serde_json::json!("pause"),
        };
        assert!(!policy.should_retry(&interrupt));
        assert!(policy.should_retry(&NodeError::Other("boom".into())));
    }

    #[test]
    fn transient_policy_classifies_connection_errors() {
        let policy = RetryPolicy::transient(3);
        assert!(policy.should_retry(&NodeError::Connection {
            message: "reset".into()
        }));
        assert!(!policy.should_retry(&NodeError::Other("logic bug".into())));
    }
}
