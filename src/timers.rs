//! Scoped timers for the phases of an authorization.

use std::time::{Duration, Instant};

/// Adds the time between creation and drop to `slot`.
///
/// ```rust,ignore
/// let mut authorize = Duration::ZERO;
/// {
///     let _timer = PhaseTimer::new(&mut authorize);
///     // ... run the policies ...
/// }
/// ```
pub(crate) struct PhaseTimer<'a> {
    start: Instant,
    slot: &'a mut Duration,
}

impl<'a> PhaseTimer<'a> {
    pub(crate) fn new(slot: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            slot,
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        *self.slot += self.start.elapsed();
    }
}

/// Milliseconds as a float, for log fields and metrics.
pub(crate) fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
