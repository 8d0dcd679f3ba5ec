//! Time source for keepalive and retry deadlines

use std::time::Instant;

/// Monotonic clock consulted by the client on every operation
///
/// Production code uses [`SystemClock`]; tests drive time explicitly with
/// [`crate::testing::ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
