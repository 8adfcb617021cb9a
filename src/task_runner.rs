/// Failure Tracking for Background Sweeps
///
/// Counts consecutive whole-sweep failures and spaces out retries with
/// exponential backoff. Unlike a circuit breaker it never gives up: the
/// scheduler keeps ticking, it only waits longer between attempts.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Backoff configuration for a background task
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_retry_delay: Duration,
    /// Upper bound on the delay
    pub max_retry_delay: Duration,
    /// Consecutive failures after which every failure is logged at error level
    pub alert_after: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
            alert_after: 5,
        }
    }
}

#[derive(Debug)]
pub struct FailureTracker {
    task_name: String,
    config: BackoffConfig,
    consecutive_failures: u32,
    current_retry_delay: Duration,
    retry_at: Option<Instant>,
}

impl FailureTracker {
    pub fn new(task_name: impl Into<String>, config: BackoffConfig) -> Self {
        Self {
            task_name: task_name.into(),
            current_retry_delay: config.initial_retry_delay,
            config,
            consecutive_failures: 0,
            retry_at: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the task should sit this attempt out
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn record_failure(&mut self, now: Instant, reason: &str) -> Duration {
        self.consecutive_failures += 1;
        let delay = self.current_retry_delay;
        self.retry_at = Some(now + delay);
        // Exponential backoff with cap
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, self.config.max_retry_delay);

        if self.consecutive_failures >= self.config.alert_after {
            error!(
                "Task '{}' failed {} times in a row: {}. Retrying in {:?}",
                self.task_name, self.consecutive_failures, reason, delay
            );
        } else {
            warn!(
                "Task '{}' failed (attempt {}): {}. Retrying in {:?}",
                self.task_name, self.consecutive_failures, reason, delay
            );
        }
        delay
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                "Task '{}' recovered after {} failures",
                self.task_name, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.current_retry_delay = self.config.initial_retry_delay;
        self.retry_at = None;
    }
}
