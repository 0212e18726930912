//! Response collection: one input poll per frame, timestamped against the
//! session clock and attached to the active trial/phase.

use trialkit_core::{EventLog, EventRecord, Parameters, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Press,
    Release,
}

/// Discrete event reported by the input device: a device-relative key
/// identifier plus press/release kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub key: String,
    pub kind: ButtonKind,
}

impl InputEvent {
    pub fn press(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ButtonKind::Press,
        }
    }

    pub fn release(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ButtonKind::Release,
        }
    }
}

/// Abstract input device, polled once per frame by the runner.
pub trait InputSource {
    fn poll(&mut self) -> anyhow::Result<Vec<InputEvent>>;
}

/// Input source for runs without response devices.
#[derive(Debug, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll(&mut self) -> anyhow::Result<Vec<InputEvent>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Continue,
    Abort,
}

/// Polls the device and logs every event from the batch with the single
/// frame timestamp, preserving polling order among them. Also watches for
/// the whole-session abort key. Owned by the session runner.
pub(crate) struct ResponseCollector {
    abort_key: String,
}

impl ResponseCollector {
    pub(crate) fn new(abort_key: impl Into<String>) -> Self {
        Self {
            abort_key: abort_key.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn collect(
        &mut self,
        input: &mut dyn InputSource,
        now_secs: f64,
        trial_nr: usize,
        phase: usize,
        phase_name: &str,
        parameters: &Parameters,
        log: &mut EventLog,
    ) -> Result<PollOutcome, RunError> {
        let events = input.poll().map_err(|source| RunError::Callback {
            stage: "input",
            trial_nr,
            phase,
            source: source.into(),
        })?;

        let mut outcome = PollOutcome::Continue;
        for event in events {
            if event.kind == ButtonKind::Press && event.key == self.abort_key {
                outcome = PollOutcome::Abort;
            }
            let mut params = parameters.clone();
            params.insert(
                "button",
                match event.kind {
                    ButtonKind::Press => "press",
                    ButtonKind::Release => "release",
                },
            );
            log.append(EventRecord::response(
                trial_nr, phase, phase_name, now_secs, &event.key, params,
            ))?;
        }
        Ok(outcome)
    }
}
