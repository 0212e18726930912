use std::time::Duration;

/// Non-slip phase deadline chain.
///
/// Each phase target is anchored to the previous one: `arm` extends the
/// deadline by the phase duration rather than measuring from the current
/// time, so a frame check that runs late does not shift any later target.
/// Lateness within a phase is absorbed, not accumulated.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineTimer {
    deadline: Duration,
}

impl DeadlineTimer {
    /// Starts the chain at the given clock reading (normally run start).
    pub fn start_at(now: Duration) -> Self {
        Self { deadline: now }
    }

    /// Extends the deadline by one phase duration, anchored to the previous
    /// deadline.
    pub fn arm(&mut self, duration: Duration) {
        self.deadline += duration;
    }

    pub fn expired(&self, now: Duration) -> bool {
        now >= self.deadline
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn remaining(&self, now: Duration) -> Duration {
        self.deadline.saturating_sub(now)
    }

    /// Drops the anchor to the current time. Frame-timed phases end on the
    /// refresh itself, so the chain re-anchors there; a timed phase never
    /// resyncs.
    pub fn resync(&mut self, now: Duration) {
        self.deadline = now;
    }
}
