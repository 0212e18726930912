//! Phase model: a named, timed unit within a trial.
//!
//! A phase is pure state; the trial driver owns the transitions. The state
//! machine is `Pending -> Active -> Completed`, each transition taken exactly
//! once. Durations are either wall-clock seconds or display refresh cycles;
//! the enum makes "both at once" unrepresentable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fallback label for phases constructed without a name.
pub const DEFAULT_PHASE_NAME: &str = "stim";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseDuration {
    /// Wall-clock seconds, checked against the non-slip deadline chain.
    Seconds(f64),
    /// Display refresh cycles, counted from activation.
    Frames(u32),
}

impl PhaseDuration {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if let PhaseDuration::Seconds(secs) = self {
            // The deadline chain arms with a `Duration`, so anything it
            // cannot represent (NaN, negative, non-finite, overflow) is
            // rejected here rather than at activation.
            if Duration::try_from_secs_f64(*secs).is_err() {
                return Err(ConfigError::InvalidDuration {
                    name: name.to_string(),
                    reason: format!("{secs} seconds"),
                });
            }
        }
        Ok(())
    }
}

/// Construction-time description of a phase, before it is bound to a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub name: String,
    pub duration: PhaseDuration,
}

impl PhaseSpec {
    pub fn seconds(name: impl Into<String>, secs: f64) -> Self {
        Self {
            name: name.into(),
            duration: PhaseDuration::Seconds(secs),
        }
    }

    pub fn frames(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            duration: PhaseDuration::Frames(count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone)]
pub struct Phase {
    index: usize,
    name: String,
    duration: PhaseDuration,
    state: PhaseState,
    onset: Option<f64>,
    frames_elapsed: u32,
}

impl Phase {
    /// Binds a spec to a position within its trial. An empty name falls back
    /// to [`DEFAULT_PHASE_NAME`].
    pub fn new(index: usize, spec: PhaseSpec) -> Result<Self, ConfigError> {
        let name = if spec.name.is_empty() {
            DEFAULT_PHASE_NAME.to_string()
        } else {
            spec.name
        };
        spec.duration.validate(&name)?;
        Ok(Self {
            index,
            name,
            duration: spec.duration,
            state: PhaseState::Pending,
            onset: None,
            frames_elapsed: 0,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> PhaseDuration {
        self.duration
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Onset in seconds since the clock origin; `None` until activation.
    pub fn onset(&self) -> Option<f64> {
        self.onset
    }

    pub fn frames_elapsed(&self) -> u32 {
        self.frames_elapsed
    }

    /// `Pending -> Active`. The onset is set here, exactly once.
    pub fn activate(&mut self, onset_secs: f64) {
        debug_assert_eq!(self.state, PhaseState::Pending);
        if self.state == PhaseState::Pending {
            self.state = PhaseState::Active;
            self.onset = Some(onset_secs);
        }
    }

    /// Counts one displayed frame while active.
    pub fn record_frame(&mut self) {
        if self.state == PhaseState::Active {
            self.frames_elapsed += 1;
        }
    }

    /// Whether a frame-timed phase has run its course. Seconds-timed phases
    /// are checked against the deadline chain by the trial driver instead.
    pub fn frames_done(&self) -> bool {
        match self.duration {
            PhaseDuration::Frames(target) => self.frames_elapsed >= target,
            PhaseDuration::Seconds(_) => false,
        }
    }

    /// `Active -> Completed`. No re-entry afterwards.
    pub fn complete(&mut self) {
        debug_assert_eq!(self.state, PhaseState::Active);
        self.state = PhaseState::Completed;
    }
}
