//! Session settings: a typed core section plus free-form sections for the
//! external collaborators (display geometry, device addresses, ...).
//!
//! User overrides are deep-merged over the defaults per top-level section
//! and the merged result is snapshotted into the output directory, so every
//! run records exactly the configuration it saw.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trialkit_core::ConfigError;

/// Settings consumed by the timing core itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Nominal display refresh rate, Hz.
    pub expected_framerate: f64,
    /// A frame interval beyond `slack / framerate` counts as dropped.
    pub frame_slack: f64,
    /// Pressing this key aborts the whole session (gracefully; the log is
    /// still sealed).
    pub abort_key: String,
}

impl CoreSettings {
    /// Settings come straight from user JSON, so the values the timing
    /// machinery divides by or turns into `Duration`s are checked before
    /// any session is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.expected_framerate.is_finite() || self.expected_framerate <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                name: "expected_framerate".to_string(),
                reason: format!("{} Hz", self.expected_framerate),
            });
        }
        if !self.frame_slack.is_finite() || self.frame_slack < 1.0 {
            return Err(ConfigError::InvalidSetting {
                name: "frame_slack".to_string(),
                reason: format!("{} (must be at least 1.0)", self.frame_slack),
            });
        }
        Ok(())
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            expected_framerate: 60.0,
            frame_slack: 2.0,
            abort_key: "q".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub core: CoreSettings,
    /// Collaborator sections, read-only to the core.
    #[serde(flatten)]
    pub sections: BTreeMap<String, Value>,
}

impl Settings {
    pub fn defaults() -> Self {
        warn!("no settings file given; using defaults");
        Self::default()
    }

    /// Loads user overrides from a JSON file and deep-merges them over the
    /// defaults, recursing into nested objects per top-level section.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&text)?;
        let mut merged = serde_json::to_value(Settings::default())?;
        deep_merge(&mut merged, user);
        Ok(serde_json::from_value(merged)?)
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Writes the merged settings snapshot for the run.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Recursive merge: objects merge key-wise, anything else in `user` replaces
/// the default.
fn deep_merge(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Object(base_map), Value::Object(user_map)) => {
            for (key, user_val) in user_map {
                if let Some(base_val) = base_map.get_mut(&key) {
                    if base_val.is_object() && user_val.is_object() {
                        deep_merge(base_val, user_val);
                        continue;
                    }
                }
                base_map.insert(key, user_val);
            }
        }
        (base, user) => *base = user,
    }
}
