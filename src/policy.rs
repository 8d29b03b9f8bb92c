use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{NotebookError, Result};

/// Bounded exponential backoff configuration.
///
/// `delay(attempt) = min(base_delay_ms * backoff_multiplier^attempt, max_delay_ms)`.
/// No jitter is applied, so delays are reproducible from the policy alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns a copy with a different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff delay to wait after the failed attempt with index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay_ms as f64;

        let millis = if raw.is_nan() || raw >= cap {
            self.max_delay_ms
        } else if raw <= 0.0 {
            0
        } else {
            raw as u64
        };
        Duration::from_millis(millis)
    }

    /// Rejects policies whose delays would shrink between attempts.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(NotebookError::Config(format!(
                "backoff_multiplier must be a finite value >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(NotebookError::Config(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}
