//! Trial driver: an ordered phase list advanced once per display refresh.
//!
//! The driver is a fixed core; experiment-specific presentation plugs in
//! through the [`TrialBehavior`] trait object instead of subclassing. Each
//! frame the session runner calls [`Trial::frame`] (activate + draw +
//! prefetch request), presents the display, then calls
//! [`Trial::after_present`] (frame accounting + completion check), matching
//! the check-after-flip discipline of the run loop.

use std::fmt;
use std::time::Duration;

use log::debug;

use trialkit_core::{
    ConfigError, EventLog, EventRecord, Parameters, Phase, PhaseDuration, PhaseSpec, PhaseState,
    RunError,
};
use trialkit_timing::DeadlineTimer;

/// Context handed to the draw callback, once per frame.
#[derive(Debug)]
pub struct FrameInfo<'a> {
    pub trial_nr: usize,
    pub phase: usize,
    pub phase_name: &'a str,
    /// Seconds since the clock origin.
    pub now: f64,
    /// Frames already presented for the active phase.
    pub frames_in_phase: u32,
}

/// Custom-marker sink: labels pushed during a draw are logged with that
/// frame's timestamp, tagged with the active trial/phase.
#[derive(Debug, Default)]
pub struct Markers(Vec<String>);

impl Markers {
    pub fn push(&mut self, label: impl Into<String>) {
        self.0.push(label.into());
    }
}

/// Per-trial presentation callback. Side effects are presentation only; the
/// runner presents the frame after this returns.
pub trait TrialBehavior {
    fn draw(&mut self, frame: &FrameInfo<'_>, markers: &mut Markers) -> anyhow::Result<()>;
}

/// Behavior for timing-only runs (fixation, rest blocks, tests).
#[derive(Debug, Default)]
pub struct NoDraw;

impl TrialBehavior for NoDraw {
    fn draw(&mut self, _frame: &FrameInfo<'_>, _markers: &mut Markers) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Trial {
    trial_nr: usize,
    phases: Vec<Phase>,
    parameters: Parameters,
    load_next_during: Option<usize>,
    trigger_fired: bool,
    current: usize,
    behavior: Box<dyn TrialBehavior>,
}

// Hand-written because the behavior object is opaque.
impl fmt::Debug for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trial")
            .field("trial_nr", &self.trial_nr)
            .field("phases", &self.phases)
            .field("parameters", &self.parameters)
            .field("load_next_during", &self.load_next_during)
            .field("trigger_fired", &self.trigger_fired)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Trial {
    /// Validates and builds a trial. `trial_nr` is caller-assigned and not
    /// required to be sequential. Fails without leaving partial state:
    /// a trial needs at least one phase and every duration must be valid.
    pub fn new(
        trial_nr: usize,
        specs: Vec<PhaseSpec>,
        parameters: Parameters,
    ) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyPhases);
        }
        let phases = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Phase::new(index, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            trial_nr,
            phases,
            parameters,
            load_next_during: None,
            trigger_fired: false,
            current: 0,
            behavior: Box::new(NoDraw),
        })
    }

    /// Marks the phase during which the next trial should be loaded. Fires
    /// at most once per trial, when that phase activates.
    pub fn load_next_during(mut self, phase: usize) -> Result<Self, ConfigError> {
        if phase >= self.phases.len() {
            return Err(ConfigError::TriggerOutOfRange {
                trigger: phase,
                n_phases: self.phases.len(),
            });
        }
        self.load_next_during = Some(phase);
        Ok(self)
    }

    pub fn with_behavior(mut self, behavior: Box<dyn TrialBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn trial_nr(&self) -> usize {
        self.trial_nr
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn is_finished(&self) -> bool {
        self.current == self.phases.len()
    }

    /// Index of the phase the next frame belongs to (the last phase once
    /// the trial is finished).
    pub fn current_phase_index(&self) -> usize {
        self.current.min(self.phases.len() - 1)
    }

    pub fn current_phase_name(&self) -> &str {
        self.phases[self.current_phase_index()].name()
    }

    pub(crate) fn current_phase_duration(&self) -> PhaseDuration {
        self.phases[self.current_phase_index()].duration()
    }

    /// First half of the per-frame procedure: activate a pending phase
    /// (logging its onset), run the draw callback, drain markers, and report
    /// whether the load-next trigger fired this frame.
    pub(crate) fn frame(
        &mut self,
        now_secs: f64,
        log: &mut EventLog,
        deadline: &mut DeadlineTimer,
        frames_since_onset: &mut usize,
    ) -> Result<bool, RunError> {
        debug_assert!(!self.is_finished());
        let phase = &mut self.phases[self.current];

        if phase.state() == PhaseState::Pending {
            phase.activate(now_secs);
            if let PhaseDuration::Seconds(secs) = phase.duration() {
                deadline.arm(Duration::from_secs_f64(secs));
            }
            debug!(
                "trial {} phase {} ({}) start: {:.5}",
                self.trial_nr,
                phase.index(),
                phase.name(),
                now_secs
            );
            log.append(EventRecord::phase_onset(
                self.trial_nr,
                phase.index(),
                phase.name(),
                now_secs,
                *frames_since_onset,
                self.parameters.clone(),
            ))?;
            *frames_since_onset = 0;
        }

        let info = FrameInfo {
            trial_nr: self.trial_nr,
            phase: phase.index(),
            phase_name: phase.name(),
            now: now_secs,
            frames_in_phase: phase.frames_elapsed(),
        };
        let mut markers = Markers::default();
        self.behavior
            .draw(&info, &mut markers)
            .map_err(|source| RunError::Callback {
                stage: "draw",
                trial_nr: self.trial_nr,
                phase: self.current,
                source: source.into(),
            })?;
        for label in markers.0 {
            log.append(EventRecord::marker(
                self.trial_nr,
                self.current,
                self.phases[self.current].name(),
                now_secs,
                &label,
                self.parameters.clone(),
            ))?;
        }

        let trigger = self.load_next_during == Some(self.current) && !self.trigger_fired;
        if trigger {
            self.trigger_fired = true;
        }
        Ok(trigger)
    }

    /// Second half, called after the display present: count the frame and
    /// check the completion condition against the deadline chain (seconds)
    /// or the frame tally (frames). Returns true once the trial is terminal.
    ///
    /// Frame-timed phases are anchored to the refresh itself, so completing
    /// one resyncs the deadline chain; a seconds phase never does.
    pub(crate) fn after_present(&mut self, now: Duration, deadline: &mut DeadlineTimer) -> bool {
        let phase = &mut self.phases[self.current];
        phase.record_frame();

        let done = match phase.duration() {
            PhaseDuration::Seconds(_) => deadline.expired(now),
            PhaseDuration::Frames(_) => phase.frames_done(),
        };
        if done {
            if matches!(phase.duration(), PhaseDuration::Frames(_)) {
                deadline.resync(now);
            }
            phase.complete();
            self.current += 1;
        }
        self.is_finished()
    }
}
