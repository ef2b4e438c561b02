//! Exponential backoff for store requests
//!
//! Attempt *i* (counting retries from 1) waits
//! `min(initial_delay * multiplier^(i-1), max_delay)` before it is sent, with
//! no jitter. At most `max_retries + 1` attempts are made. A non-retryable
//! error stops the loop at once; cancellation during a wait or an attempt
//! ends it with a timeout-kind error.

use crate::config::ClientConfig;
use crate::errors::{Error, Result};
use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    /// Schedule described by a client configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay,
            max_delay: config.max_retry_delay,
            multiplier: config.retry_multiplier,
        }
    }

    /// Total attempts, first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }

    /// The equivalent `backoff` schedule
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        backoff
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget runs out
    ///
    /// The final error is the last failure wrapped with the attempt count; its
    /// kind is unchanged.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.max_attempts();

        let attempt = || {
            let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = operation();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if n < max_attempts && e.is_retryable() => {
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => {
                        if !e.is_retryable() {
                            debug!(attempt = n, error = %e, "non-retryable error, not retrying");
                        }
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        };

        let notify = |err: Error, delay: Duration| {
            debug!(
                attempt = attempts.load(Ordering::Relaxed),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled()),
            result = retry_notify(self.backoff(), attempt, notify) => result.map_err(|e| {
                let n = attempts.load(Ordering::Relaxed);
                e.context(format!("request failed after {n} attempt(s)"))
            }),
        }
    }
}
