use std::time::Duration;

use log::warn;

const MAX_SAMPLES: usize = 10_000;

/// Records the interval between successive display presents and flags
/// intervals that exceed the expected refresh period by a slack factor.
/// A flagged frame is a diagnostic, never a fatal condition.
#[derive(Debug, Clone)]
pub struct FrameMonitor {
    expected: Duration,
    threshold: Duration,
    intervals: Vec<Duration>,
    last_mark: Option<Duration>,
    total_frames: usize,
    dropped: usize,
}

impl FrameMonitor {
    /// `expected_hz` is the nominal refresh rate; an interval longer than
    /// `slack / expected_hz` counts as a dropped frame.
    pub fn new(expected_hz: f64, slack: f64) -> Self {
        let expected = Duration::from_secs_f64(1.0 / expected_hz);
        Self {
            expected,
            threshold: expected.mul_f64(slack),
            intervals: Vec::with_capacity(1024),
            last_mark: None,
            total_frames: 0,
            dropped: 0,
        }
    }

    pub fn expected_period(&self) -> Duration {
        self.expected
    }

    /// Called once per present with the current clock reading. The first
    /// mark only sets the reference point.
    pub fn mark(&mut self, now: Duration) {
        self.total_frames += 1;
        if let Some(prev) = self.last_mark.replace(now) {
            let interval = now.saturating_sub(prev);
            if self.intervals.len() >= MAX_SAMPLES {
                self.intervals.remove(0);
            }
            self.intervals.push(interval);
            if interval > self.threshold {
                self.dropped += 1;
                warn!(
                    "frame {} took {:.2} ms (expected {:.2} ms)",
                    self.total_frames,
                    interval.as_secs_f64() * 1e3,
                    self.expected.as_secs_f64() * 1e3,
                );
            }
        }
    }

    pub fn frames(&self) -> usize {
        self.total_frames
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn stats(&self) -> FrameStats {
        let ms: Vec<f64> = self
            .intervals
            .iter()
            .map(|d| d.as_secs_f64() * 1e3)
            .collect();
        if ms.is_empty() {
            return FrameStats {
                frames: self.total_frames,
                dropped: self.dropped,
                ..FrameStats::default()
            };
        }
        let mean = ms.iter().sum::<f64>() / ms.len() as f64;
        let var = ms.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / ms.len() as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &x in &ms {
            min = min.min(x);
            max = max.max(x);
        }
        FrameStats {
            mean_interval_ms: mean,
            jitter_ms: var.sqrt(),
            min_interval_ms: min,
            max_interval_ms: max,
            effective_hz: if mean > 0.0 { 1e3 / mean } else { 0.0 },
            frames: self.total_frames,
            dropped: self.dropped,
        }
    }
}

/// Frame-interval summary for the run report.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub mean_interval_ms: f64,
    pub jitter_ms: f64,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub effective_hz: f64,
    pub frames: usize,
    pub dropped: usize,
}
