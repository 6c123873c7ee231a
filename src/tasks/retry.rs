use std::time::Duration;

/// Fixed retry policy attached to a task definition
///
/// Interpreted by the worker pool: a failed attempt is redelivered after
/// `delay` until `max_retries` retries have been spent, then abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_retries: u32,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after `delay`; `retry` is the 1-based retry number
    Retry { retry: u32, delay: Duration },
    Abandon,
}

impl RetryPolicy {
    pub const fn new(delay_secs: u64, max_retries: u32) -> Self {
        Self {
            delay: Duration::from_secs(delay_secs),
            max_retries,
        }
    }

    /// Never retry
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Decide the next step given how many retries were already spent
    pub fn next(&self, retries_done: u32) -> RetryDecision {
        if retries_done < self.max_retries {
            RetryDecision::Retry {
                retry: retries_done + 1,
                delay: self.delay,
            }
        } else {
            RetryDecision::Abandon
        }
    }

    /// Total number of runs a failing invocation gets
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
