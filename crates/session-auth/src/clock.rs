//! Wall-clock abstraction.
//!
//! Token expiry is compared against wall-clock time, while watcher cadence
//! runs on tokio time. Keeping wall-clock reads behind [`Clock`] lets tests
//! move both together.

use chrono::Utc;

/// Source of the current time in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
