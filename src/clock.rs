//! Time seam for the controller.
//!
//! Node ages, expiration TTLs, and the stabilization window are all measured
//! against this trait rather than the system clock directly so tests can pin
//! time.

use chrono::{DateTime, Duration, Utc};

#[cfg(test)]
use mockall::automock;

/// Source of the current time.
#[cfg_attr(test, automock)]
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Elapsed time since `t`. Negative if `t` is in the future.
    fn since(&self, t: DateTime<Utc>) -> Duration {
        self.now() - t
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
