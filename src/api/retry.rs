use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

/// Bounded retries with a fixed delay around a fallible async call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retryable: fn(&EngineError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable: EngineError::is_retryable,
        }
    }

    /// Replace the predicate deciding which errors are worth another attempt
    pub fn with_predicate(mut self, retryable: fn(&EngineError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.retryable)(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(EngineError::RetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        label,
                        e,
                        self.delay,
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.delay_secs))
    }
}
