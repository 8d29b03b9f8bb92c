use crate::{NotebookError, Result, RetryPolicy};

/// Configures per-attempt timeout and retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Backoff policy applied when a request carries no override.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Builds options from defaults overridden by environment variables.
    ///
    /// Reads (all optional):
    /// - `NOTEBOOK_TIMEOUT_MS`: per-attempt timeout
    /// - `NOTEBOOK_MAX_RETRIES`: retries after the initial attempt
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Some(timeout_ms) = read_env_number::<u64>("NOTEBOOK_TIMEOUT_MS")? {
            options.timeout_ms = timeout_ms;
        }
        if let Some(max_retries) = read_env_number::<u32>("NOTEBOOK_MAX_RETRIES")? {
            options.retry.max_retries = max_retries;
        }
        options.retry.validate()?;
        Ok(options)
    }
}

fn read_env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| NotebookError::Config(format!("{name} must be a number, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}
