//! Rate-limit-aware retry with exponential backoff
//!
//! Wraps a single fallible remote operation. Rate-limit signals always retry
//! after the remote-suggested wait (scaled and capped); transient errors
//! retry on a budget; permanent errors propagate immediately.

use std::time::Duration;

use tracing::{debug, warn};

use crate::client::ClientError;

/// Backoff growth factor per attempt
const GROWTH: f64 = 1.5;

/// Retry behaviour for remote protocol calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt budget for transient errors (total tries, not retries)
    pub max_attempts: u32,
    /// Base sleep for the first transient retry
    pub backoff_base: Duration,
    /// Upper bound on a single rate-limit wait, before jitter
    pub rate_limit_cap: Duration,
    /// Jitter range in seconds added to every rate-limit wait
    pub rate_limit_jitter: (f64, f64),
    /// Jitter range in seconds added to every transient backoff
    pub transient_jitter: (f64, f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base: Duration::from_secs(1),
            rate_limit_cap: Duration::from_secs(3600),
            rate_limit_jitter: (5.0, 15.0),
            transient_jitter: (0.0, 3.0),
        }
    }
}

impl RetryPolicy {
    /// Sleep duration for the nth rate-limit retry (0-indexed).
    ///
    /// The remote-suggested wait is scaled by the growth factor and capped,
    /// so a platform that keeps naming the same cooldown still backs off,
    /// but a single wait can never exceed the cap plus jitter.
    pub fn rate_limit_delay(&self, suggested: Duration, attempt: u32) -> Duration {
        let scaled = suggested.as_secs_f64() * GROWTH.powi(attempt as i32);
        let capped = scaled.min(self.rate_limit_cap.as_secs_f64());
        Duration::from_secs_f64(capped + jitter(self.rate_limit_jitter))
    }

    /// Sleep duration for the nth transient retry (0-indexed)
    pub fn transient_delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_base.as_secs_f64() * GROWTH.powi(attempt as i32);
        Duration::from_secs_f64(backoff + jitter(self.transient_jitter))
    }

    /// Run the operation, retrying per policy.
    ///
    /// Rate-limit retries are unbounded; transient retries stop after
    /// `max_attempts` tries and propagate the last error. Permanent errors
    /// (privacy restrictions, unresolvable identifiers, definitive API
    /// rejections) propagate immediately.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut rate_limit_attempts: u32 = 0;
        let mut transient_attempts: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ClientError::RateLimited { retry_after }) => {
                    let wait = self.rate_limit_delay(retry_after, rate_limit_attempts);
                    rate_limit_attempts += 1;
                    warn!(
                        ?retry_after,
                        wait_ms = wait.as_millis() as u64,
                        attempt = rate_limit_attempts,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_retryable() => {
                    transient_attempts += 1;
                    if transient_attempts >= self.max_attempts {
                        warn!(error = %e, attempts = transient_attempts, "retry budget exhausted");
                        return Err(e);
                    }
                    let wait = self.transient_delay(transient_attempts - 1);
                    debug!(
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        attempt = transient_attempts,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Uniform jitter in seconds over an inclusive range
fn jitter((min, max): (f64, f64)) -> f64 {
    if max <= min {
        return min;
    }
    use rand::Rng;
    rand::rng().random_range(min..=max)
}
