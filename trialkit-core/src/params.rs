//! Typed trial parameters.
//!
//! Every record logged for a trial carries the trial's parameters verbatim;
//! at seal time each key becomes a log column (the union across trials).
//! List values expand into indexed columns `key_0, key_1, ...`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Rendering used for log cells.
    fn cell(&self) -> String {
        match self {
            ParamValue::Bool(v) => v.to_string(),
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Float(v) => v.to_string(),
            ParamValue::Str(v) => v.clone(),
            // Nested lists render compact; top-level lists are expanded into
            // indexed columns before this is reached.
            ParamValue::List(items) => items
                .iter()
                .map(|v| v.cell())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl<V: Into<ParamValue>> From<Vec<V>> for ParamValue {
    fn from(v: Vec<V>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered key -> value payload attached to a trial. `BTreeMap` keeps the
/// derived log columns deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Flattens into `(column, cell)` pairs. Scalars map to one column; a
    /// list of length n maps to `key_0 .. key_{n-1}`.
    pub fn columns(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                ParamValue::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        out.push((format!("{key}_{i}"), item.cell()));
                    }
                }
                other => out.push((key.clone(), other.cell())),
            }
        }
        out
    }
}

impl FromIterator<(String, ParamValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
