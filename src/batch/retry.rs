//! Exponential backoff with jitter for transient RPC failures
//!
//! Only [`DispatchError::Transient`] is retried. Every other error is returned
//! on first sight. Once the attempt budget is spent the last transient error is
//! wrapped in [`DispatchError::SubmissionFailed`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::errors::DispatchError;

/// Retry configuration with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 to 1.0) - adds randomness to backoff
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_base_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 8_000 }
fn default_jitter_factor() -> f64 { 0.2 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// No jitter, so delays are exact
    pub fn deterministic(max_attempts: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_backoff_ms,
            max_backoff_ms,
            jitter_factor: 0.0,
        }
    }

    /// Backoff delay before the retry following attempt `attempt` (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt.min(31) as i32);
        let capped_backoff = exp_backoff.min(self.max_backoff_ms as f64);

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped_backoff as u64);
        }

        let jitter_range = capped_backoff * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((capped_backoff + jitter).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, DispatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let start_time = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => {
                warn!(
                    operation = operation_name,
                    category = err.category(),
                    error = %err,
                    "Permanent error, not retrying"
                );
                return Err(err);
            }
            Err(err) => {
                last_error = err.to_string();
                if attempt + 1 < max_attempts {
                    let backoff = config.calculate_backoff(attempt);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off before retry"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    warn!(
        operation = operation_name,
        attempts = max_attempts,
        error = %last_error,
        "All retry attempts exhausted"
    );
    Err(DispatchError::SubmissionFailed {
        attempts: max_attempts,
        last: last_error,
    })
}
