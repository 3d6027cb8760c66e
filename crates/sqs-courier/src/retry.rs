//! # Retry Policy Module
//!
//! Bounded retry of signed actions that failed on the server side.
//!
//! Classification lives in [`is_retryable`]; the attempt counter is plain data
//! threaded through the caller's loop.

use crate::error::{ConfigurationError, QueueError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for service actions
///
/// # Examples
///
/// ```rust
/// use sqs_courier::retry::RetryPolicy;
///
/// // Default policy: 2 retries (3 attempts), no delay between attempts
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.total_attempts(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial one
    pub max_retries: u32,

    /// Fixed pause before each retry, in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Hard cap on retries after the initial attempt
    pub const MAX_RETRIES: u32 = 2;

    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// A policy that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    /// Reject policies that would retry more often than [`Self::MAX_RETRIES`].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_retries > Self::MAX_RETRIES {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "retry.max_retries ({}) exceeds the limit of {}",
                    self.max_retries,
                    Self::MAX_RETRIES
                ),
            });
        }
        Ok(())
    }

    /// Check if another attempt is allowed
    ///
    /// # Arguments
    ///
    /// * `retries_so_far` - Number of retries already made (0 after the initial attempt)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sqs_courier::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default(); // max_retries = 2
    ///
    /// assert!(policy.should_retry(0));
    /// assert!(policy.should_retry(1));
    /// assert!(!policy.should_retry(2));
    /// ```
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Pause before the next attempt
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total attempts including the initial one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Classify an error for the retry loop.
///
/// Only service responses with an HTTP status in 500..=599 are retried.
pub fn is_retryable(error: &QueueError) -> bool {
    error.is_retryable()
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
