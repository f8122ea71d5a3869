//! Retry combinator with jittered exponential backoff.
//!
//! Only failures that [`ErrorEnvelope::is_retryable`] accepts are retried.
//! There is no sleep after the final attempt, and only the last error is
//! returned when attempts run out.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sessionwire_protocol::{ErrorEnvelope, RetryPolicy};

/// Delay before retry number `attempt` (0-based).
///
/// `min(base * 2^attempt, max)` shifted by a uniform offset in
/// `±jitter_factor * delay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    backoff_delay_with(policy, attempt, &mut rand::rng())
}

pub fn backoff_delay_with<R: Rng + ?Sized>(
    policy: &RetryPolicy,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let nominal = policy.nominal_delay_ms(attempt) as f64;
    let spread = nominal * policy.jitter_factor.clamp(0.0, 1.0);
    let offset = if spread > 0.0 {
        rng.random_range(-spread..=spread)
    } else {
        0.0
    };
    Duration::from_millis((nominal + offset).max(0.0).round() as u64)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have been made. `op` receives the 0-based
/// attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ErrorEnvelope>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ErrorEnvelope>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
