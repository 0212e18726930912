//! Append-only event log.
//!
//! Records accumulate in memory for the whole run, in non-decreasing onset
//! order, and are written out once at session close as a tab-separated table
//! (one row per record) for downstream statistical tooling. Durations are
//! derived at seal time: each phase-onset record lasts until the next onset
//! (the last one until the experiment stop time). Sealing on a failed run
//! keeps the buffer intact so the caller can retry the write.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::LogError;
use crate::params::Parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhaseOnset,
    Response,
    Marker,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PhaseOnset => "phase_onset",
            EventType::Response => "response",
            EventType::Marker => "marker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Seconds since the clock origin.
    pub onset: f64,
    pub trial_nr: usize,
    pub phase: usize,
    pub phase_name: String,
    pub event_type: EventType,
    /// Payload column: response key, or marker label.
    pub response: Option<String>,
    /// For onset records: frames presented since the previous onset record.
    /// Shifted one slot at seal time so each row reports its own phase.
    pub nr_frames: Option<usize>,
    pub parameters: Parameters,
}

impl EventRecord {
    pub fn phase_onset(
        trial_nr: usize,
        phase: usize,
        phase_name: &str,
        onset: f64,
        frames_before: usize,
        parameters: Parameters,
    ) -> Self {
        Self {
            onset,
            trial_nr,
            phase,
            phase_name: phase_name.to_string(),
            event_type: EventType::PhaseOnset,
            response: None,
            nr_frames: Some(frames_before),
            parameters,
        }
    }

    pub fn response(
        trial_nr: usize,
        phase: usize,
        phase_name: &str,
        onset: f64,
        key: &str,
        parameters: Parameters,
    ) -> Self {
        Self {
            onset,
            trial_nr,
            phase,
            phase_name: phase_name.to_string(),
            event_type: EventType::Response,
            response: Some(key.to_string()),
            nr_frames: None,
            parameters,
        }
    }

    pub fn marker(
        trial_nr: usize,
        phase: usize,
        phase_name: &str,
        onset: f64,
        label: &str,
        parameters: Parameters,
    ) -> Self {
        Self {
            onset,
            trial_nr,
            phase,
            phase_name: phase_name.to_string(),
            event_type: EventType::Marker,
            response: Some(label.to_string()),
            nr_frames: None,
            parameters,
        }
    }
}

/// In-memory event buffer with single-writer append and one-shot durable
/// serialization.
#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    sealed: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Fails once the log has been sealed. Onsets come
    /// from a single monotonic clock; a reading below the previous record
    /// is clamped to keep the order invariant.
    pub fn append(&mut self, mut record: EventRecord) -> Result<(), LogError> {
        if self.sealed {
            return Err(LogError::Sealed);
        }
        if let Some(last) = self.records.last() {
            debug_assert!(record.onset >= last.onset, "onset went backwards");
            if record.onset < last.onset {
                record.onset = last.onset;
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Seals the log and writes the full table to `path`. `exp_stop` closes
    /// the duration of the final onset record and `final_frame_count` is the
    /// frame tally of the phase that was running (or just finished) at stop.
    ///
    /// The buffer survives an I/O failure; calling `seal` again retries the
    /// write. New appends are refused either way.
    pub fn seal(
        &mut self,
        path: &Path,
        exp_stop: f64,
        final_frame_count: usize,
    ) -> Result<(), LogError> {
        self.sealed = true;
        let table = self.render(exp_stop, final_frame_count);
        fs::write(path, table).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("event log sealed: {} records -> {}", self.records.len(), path.display());
        Ok(())
    }

    fn render(&self, exp_stop: f64, final_frame_count: usize) -> String {
        // Column set = fixed header + union of parameter columns over all
        // records; rows without a key leave the cell empty.
        let mut param_cols: BTreeSet<String> = BTreeSet::new();
        for record in &self.records {
            for (col, _) in record.parameters.columns() {
                param_cols.insert(col);
            }
        }

        let onset_indices: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.event_type == EventType::PhaseOnset)
            .map(|(i, _)| i)
            .collect();

        // Duration of onset k = onset of the next onset record - its own;
        // the last one runs until exp_stop. Frame counts were recorded for
        // the *previous* phase at append time, so they shift one slot.
        let mut durations = vec![None::<f64>; self.records.len()];
        let mut frames = vec![None::<usize>; self.records.len()];
        for (k, &i) in onset_indices.iter().enumerate() {
            match onset_indices.get(k + 1) {
                Some(&j) => {
                    durations[i] = Some(self.records[j].onset - self.records[i].onset);
                    frames[i] = self.records[j].nr_frames;
                }
                None => {
                    durations[i] = Some(exp_stop - self.records[i].onset);
                    frames[i] = Some(final_frame_count);
                }
            }
        }

        let mut out = String::new();
        out.push_str("onset\tduration\ttrial_nr\tphase\tphase_name\tevent_type\tresponse\tnr_frames");
        for col in &param_cols {
            out.push('\t');
            out.push_str(col);
        }
        out.push('\n');

        for (i, record) in self.records.iter().enumerate() {
            let _ = write!(out, "{:.5}\t", record.onset);
            if let Some(d) = durations[i] {
                let _ = write!(out, "{d:.5}");
            }
            let _ = write!(
                out,
                "\t{}\t{}\t{}\t{}\t{}\t",
                record.trial_nr,
                record.phase,
                record.phase_name,
                record.event_type.as_str(),
                record.response.as_deref().unwrap_or(""),
            );
            if let Some(n) = frames[i] {
                let _ = write!(out, "{n}");
            }
            let cells = record.parameters.columns();
            for col in &param_cols {
                out.push('\t');
                if let Some((_, cell)) = cells.iter().find(|(c, _)| c == col) {
                    out.push_str(cell);
                }
            }
            out.push('\n');
        }
        out
    }
}
