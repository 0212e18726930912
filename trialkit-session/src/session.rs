//! Session runner: owns the clock, the event log and the frame bookkeeping
//! for one experimental run, and drives trials to completion one display
//! refresh at a time.
//!
//! The loop is single-threaded and frame-synchronous. Per frame: poll input,
//! advance the trial driver (activation, draw, prefetch request), present,
//! sample the frame interval, check phase completion. When the last trial
//! finishes (or the run aborts) the event log is sealed to
//! `<output_str>_events.tsv` in the output directory.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use log::{info, warn};

use trialkit_core::{ConfigError, EventLog, PhaseDuration, RunError};
use trialkit_timing::{Clock, DeadlineTimer, FrameMonitor, FrameStats, MonotonicClock};

use crate::response::{InputSource, PollOutcome, ResponseCollector};
use crate::settings::Settings;
use crate::trial::Trial;

/// Display handle: `present` marks the frame boundary (the equivalent of a
/// buffer flip). Rendering itself lives behind [`crate::TrialBehavior`].
pub trait DisplaySurface {
    fn present(&mut self) -> anyhow::Result<()>;
}

/// Deferred-trial provider. Invoked at most once per trial, when the
/// trial's load-next trigger phase activates, with the next trial's number.
/// The produced trial is enqueued; it must be ready before the runner
/// reaches it.
pub trait TrialLoader {
    fn load_next(&mut self, trial_nr: usize) -> anyhow::Result<Trial>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Ended early by the abort key; the log is sealed normally.
    Aborted,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub events_path: PathBuf,
    pub frame_stats: FrameStats,
    pub trials_run: usize,
}

#[derive(Debug)]
pub struct Session<C: Clock = MonotonicClock> {
    output_str: String,
    output_dir: PathBuf,
    settings: Settings,
    clock: C,
    log: EventLog,
    monitor: FrameMonitor,
    frames_since_onset: usize,
    exp_stop: Option<f64>,
    closed: bool,
}

impl Session<MonotonicClock> {
    /// `output_str` names the run's output files (e.g.
    /// `sub-01_ses-post_run-1`); `output_dir` defaults to `$PWD/logs`.
    pub fn new(
        output_str: impl Into<String>,
        output_dir: Option<PathBuf>,
        settings: Settings,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(output_str, output_dir, settings, MonotonicClock::new())
    }
}

impl<C: Clock> Session<C> {
    /// Same as [`Session::new`] with an injected clock.
    pub fn with_clock(
        output_str: impl Into<String>,
        output_dir: Option<PathBuf>,
        settings: Settings,
        clock: C,
    ) -> Result<Self, ConfigError> {
        settings.core.validate()?;
        let output_str = output_str.into();
        let output_dir = match output_dir {
            Some(dir) => dir,
            None => std::env::current_dir()
                .map_err(|source| ConfigError::OutputDir {
                    path: PathBuf::from("."),
                    source,
                })?
                .join("logs"),
        };
        fs::create_dir_all(&output_dir).map_err(|source| ConfigError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        // Every run records the exact configuration it saw.
        let snapshot = output_dir.join(format!("{output_str}_expsettings.json"));
        settings.write_snapshot(&snapshot)?;

        let monitor = FrameMonitor::new(
            settings.core.expected_framerate,
            settings.core.frame_slack,
        );
        Ok(Self {
            output_str,
            output_dir,
            settings,
            clock,
            log: EventLog::new(),
            monitor,
            frames_since_onset: 0,
            exp_stop: None,
            closed: false,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn events_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_events.tsv", self.output_str))
    }

    /// Runs every queued trial to completion, one frame per display refresh.
    ///
    /// `trials` is the pre-populated sequence; with a `loader`, trials whose
    /// load-next trigger fires pull their successor in on the fly instead.
    /// On a callback failure the loop stops but the log is sealed with
    /// whatever was recorded (best-effort durability); on a sealing I/O
    /// failure the buffer is kept and [`Session::flush`] retries the write.
    pub fn run(
        &mut self,
        trials: Vec<Trial>,
        display: &mut dyn DisplaySurface,
        input: &mut dyn InputSource,
        mut loader: Option<&mut dyn TrialLoader>,
    ) -> Result<RunReport, RunError> {
        if self.closed {
            return Err(RunError::AlreadyClosed);
        }

        info!("session '{}' starting: {} trial(s) queued", self.output_str, trials.len());
        self.clock.restart();
        let mut deadline = DeadlineTimer::start_at(self.clock.now());
        let mut collector = ResponseCollector::new(self.settings.core.abort_key.clone());
        let mut queue: VecDeque<Trial> = trials.into();
        let mut outcome = RunOutcome::Completed;
        let mut trials_run = 0usize;

        'trials: while let Some(mut trial) = queue.pop_front() {
            loop {
                // (a) one input poll per frame, frame-stamped.
                let poll = collector.collect(
                    input,
                    self.clock.now_secs(),
                    trial.trial_nr(),
                    trial.current_phase_index(),
                    trial.current_phase_name(),
                    trial.parameters(),
                    &mut self.log,
                );
                match poll {
                    Ok(PollOutcome::Continue) => {}
                    Ok(PollOutcome::Abort) => {
                        info!("abort key pressed; ending session");
                        outcome = RunOutcome::Aborted;
                        break 'trials;
                    }
                    Err(err) => return Err(self.abort_with(err)),
                }

                // (b) phase activation + onset record, draw, trigger check.
                let prefetch = match trial.frame(
                    self.clock.now_secs(),
                    &mut self.log,
                    &mut deadline,
                    &mut self.frames_since_onset,
                ) {
                    Ok(prefetch) => prefetch,
                    Err(err) => return Err(self.abort_with(err)),
                };

                if let Err(source) = display.present() {
                    let err = RunError::Callback {
                        stage: "present",
                        trial_nr: trial.trial_nr(),
                        phase: trial.current_phase_index(),
                        source: source.into(),
                    };
                    return Err(self.abort_with(err));
                }
                let now = self.clock.now();
                self.monitor.mark(now);
                self.frames_since_onset += 1;

                if prefetch {
                    if let Some(loader) = loader.as_mut() {
                        match self.load_next(&trial, &mut **loader) {
                            Ok(next) => queue.push_back(next),
                            Err(err) => return Err(self.abort_with(err)),
                        }
                    }
                }

                // (c) completion check against the non-slip deadline chain.
                if trial.after_present(now, &mut deadline) {
                    break;
                }
            }
            trials_run += 1;
        }

        self.finish(outcome, trials_run)
    }

    fn load_next(&mut self, trial: &Trial, loader: &mut dyn TrialLoader) -> Result<Trial, RunError> {
        let load_start = self.clock.now();
        let next = loader
            .load_next(trial.trial_nr() + 1)
            .map_err(|source| RunError::Callback {
                stage: "load",
                trial_nr: trial.trial_nr(),
                phase: trial.current_phase_index(),
                source: source.into(),
            })?;
        let load_secs = (self.clock.now() - load_start).as_secs_f64();
        if let PhaseDuration::Seconds(phase_secs) = trial.current_phase_duration() {
            if load_secs > phase_secs {
                warn!(
                    "loading trial {} took {load_secs:.5} s, longer than its hosting phase ({phase_secs:.5} s)",
                    trial.trial_nr() + 1
                );
            }
        }
        Ok(next)
    }

    /// Normal close: timestamp the stop, report frame diagnostics, seal the
    /// log to disk.
    fn finish(&mut self, outcome: RunOutcome, trials_run: usize) -> Result<RunReport, RunError> {
        let exp_stop = self.clock.now_secs();
        self.exp_stop = Some(exp_stop);
        let stats = self.monitor.stats();
        info!(
            "session '{}' done after {exp_stop:.3} s: {} trial(s), {} frames, {:.2} Hz effective",
            self.output_str, trials_run, stats.frames, stats.effective_hz
        );
        if stats.dropped > 0 {
            warn!(
                "{} of {} frame intervals exceeded {:.1}x the expected period",
                stats.dropped, stats.frames, self.settings.core.frame_slack
            );
        }

        let path = self.events_path();
        self.log.seal(&path, exp_stop, self.frames_since_onset)?;
        self.closed = true;
        Ok(RunReport {
            outcome,
            events_path: path,
            frame_stats: stats,
            trials_run,
        })
    }

    /// Best-effort durability on abnormal termination: seal whatever records
    /// exist, then hand the original error back.
    fn abort_with(&mut self, err: RunError) -> RunError {
        let exp_stop = self.clock.now_secs();
        self.exp_stop = Some(exp_stop);
        if let Err(seal_err) = self
            .log
            .seal(&self.events_path(), exp_stop, self.frames_since_onset)
        {
            warn!("could not seal event log after failed run: {seal_err}");
        }
        self.closed = true;
        err
    }

    /// Retries the final write after a sealing I/O failure; the record
    /// buffer is still intact.
    pub fn flush(&mut self) -> Result<PathBuf, RunError> {
        let exp_stop = self.exp_stop.unwrap_or_else(|| self.clock.now_secs());
        let path = self.events_path();
        self.log.seal(&path, exp_stop, self.frames_since_onset)?;
        self.closed = true;
        Ok(path)
    }
}
