//! Declarative retry schedules.
//!
//! Polling waits (chiefly the replacement-readiness wait) are expressed as a
//! [`RetrySchedule`] value rather than hand-rolled loops: a starting delay, a
//! cap, a multiplier, and an attempt budget. Delays are jittered so several
//! controllers polling the same API server do not fall into lockstep.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// A bounded exponential-backoff schedule.
#[derive(Clone, Debug)]
pub struct RetrySchedule {
    /// Total number of attempts before giving up
    pub attempts: u32,
    /// Delay after the first failed attempt
    pub delay: Duration,
    /// Ceiling the growing delay never exceeds
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each failure
    pub multiplier: f64,
}

impl RetrySchedule {
    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds or the schedule is exhausted.
///
/// Only the last error is returned; intermediate failures are logged at warn
/// level with the operation name and the upcoming delay.
pub async fn retry_with_backoff<F, Fut, T, E>(
    schedule: &RetrySchedule,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = schedule.delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= schedule.attempts => {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                // jitter: 0.5x to 1.5x of the nominal delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered).await;
                delay = schedule.next_delay(delay);
            }
        }
    }
}
