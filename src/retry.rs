//! Bounded retry for collaborator calls.
//!
//! Only [`PortError::Unavailable`] is retried. Backoff grows geometrically
//! from `initial_backoff_ms` and is capped at `max_backoff_ms`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ports::{PortError, PortResult};

/// Retry policy passed to every operation that calls a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.max(1.0).powi(exp);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }

    /// Runs `call` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> PortResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PortResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(call = what, attempt, ?delay, error = %err, "collaborator call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Turns a terminal retry failure into a readable message.
pub fn describe(what: &str, err: &PortError) -> String {
    format!("{what} check failed: {err}")
}
