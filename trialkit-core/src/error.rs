//! Error taxonomy for the timing/logging core.
//!
//! Construction faults (`ConfigError`) surface immediately to the caller
//! building a trial or session; nothing partial is left behind. Run-time
//! callback failures abort the loop but the event log is still sealed with
//! whatever records exist. Log I/O failures keep the in-memory buffer so the
//! caller can retry the write.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid trial or session configuration, raised at construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("a trial needs at least one phase")]
    EmptyPhases,

    #[error("load-next trigger phase {trigger} is out of range (trial has {n_phases} phases)")]
    TriggerOutOfRange { trigger: usize, n_phases: usize },

    #[error("invalid duration for phase '{name}': {reason}")]
    InvalidDuration { name: String, reason: String },

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("failed to read settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Event-log faults.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("event log is sealed; no further records may be appended")]
    Sealed,

    #[error("failed to write event log to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal outcome of a session run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("session is already closed")]
    AlreadyClosed,

    #[error("{stage} callback failed during trial {trial_nr}, phase {phase}: {source}")]
    Callback {
        stage: &'static str,
        trial_nr: usize,
        phase: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("event log error: {0}")]
    Log(#[from] LogError),
}
