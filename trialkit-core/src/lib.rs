pub mod error;
pub mod event;
pub mod params;
pub mod phase;

pub use error::{ConfigError, LogError, RunError};
pub use event::{EventLog, EventRecord, EventType};
pub use params::{ParamValue, Parameters};
pub use phase::{Phase, PhaseDuration, PhaseSpec, PhaseState};
