use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source with a fixed run origin.
///
/// The origin is captured exactly once, when a session transitions from
/// configuring to running; `now()` reports elapsed time since that origin
/// and never decreases between calls.
pub trait Clock {
    /// Captures the origin. The session runner calls this once at run start;
    /// nothing reads `now()` before it.
    fn restart(&mut self);

    /// Elapsed time since the origin.
    fn now(&self) -> Duration;

    /// Elapsed time since the origin, in seconds. This is the unit used
    /// throughout the event log.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

/// Production clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn restart(&mut self) {
        self.origin = Instant::now();
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests and dry runs.
///
/// A cloned handle advances the time; the session reads it through the
/// `Clock` seam like any other source. Single-threaded by construction.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Rc<Cell<Duration>>,
    origin: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that moves this clock forward.
    pub fn handle(&self) -> ManualClockHandle {
        ManualClockHandle {
            time: Rc::clone(&self.time),
        }
    }
}

impl Clock for ManualClock {
    fn restart(&mut self) {
        self.origin = self.time.get();
    }

    fn now(&self) -> Duration {
        self.time.get().saturating_sub(self.origin)
    }
}

#[derive(Debug, Clone)]
pub struct ManualClockHandle {
    time: Rc<Cell<Duration>>,
}

impl ManualClockHandle {
    pub fn advance(&self, by: Duration) {
        self.time.set(self.time.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.time.set(to);
    }
}
