//! Display state reported by nodes.
//!
//! Instrumented runtimes attach an arbitrary JSON payload to a node event when
//! the node has something worth showing (a countdown, a retry counter, a list
//! of utility scores). Only two shapes are meaningful to the debugger: a bare
//! array of numbers, or a flat record of scalars. [`DisplayState`] is that
//! tagged union; anything else is rejected at the boundary by
//! [`DisplayState::from_json`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::TraceError;

/// Record key under which utility decorators receive their projected score.
pub const LAST_SCORE_KEY: &str = "lastScore";

/// Record key conventionally holding a utility composite's score list.
pub const SCORES_KEY: &str = "scores";

// ---------------------------------------------------------------------------
// StateValue
// ---------------------------------------------------------------------------

/// A scalar (or numeric list) value inside a [`DisplayState::Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Numbers(Vec<f64>),
}

impl StateValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DisplayState
// ---------------------------------------------------------------------------

/// Display state attached to a node at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayState {
    /// Bare ordered list, e.g. the per-child scores of a utility selector.
    Scores(Vec<f64>),
    /// Flat string-keyed record of scalars.
    Record(BTreeMap<String, StateValue>),
}

impl DisplayState {
    /// Convert a dynamic JSON value.
    ///
    /// Arrays must contain only numbers; objects may contain scalars and
    /// arrays of numbers. Nested objects, mixed arrays and top-level scalars
    /// are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, TraceError> {
        match value {
            serde_json::Value::Array(items) => numbers(items)
                .map(DisplayState::Scores)
                .ok_or_else(|| unsupported("array contains non-numeric items")),
            serde_json::Value::Object(map) => {
                let mut record = BTreeMap::new();
                for (key, item) in map {
                    let converted = match item {
                        serde_json::Value::Null => StateValue::Null,
                        serde_json::Value::Bool(b) => StateValue::Bool(*b),
                        serde_json::Value::Number(n) => match n.as_f64() {
                            Some(f) => StateValue::Number(f),
                            None => return Err(unsupported("number out of range")),
                        },
                        serde_json::Value::String(s) => StateValue::Text(s.clone()),
                        serde_json::Value::Array(items) => match numbers(items) {
                            Some(list) => StateValue::Numbers(list),
                            None => {
                                return Err(unsupported(&format!(
                                    "field '{key}' is not a numeric list"
                                )))
                            }
                        },
                        serde_json::Value::Object(_) => {
                            return Err(unsupported(&format!("field '{key}' is a nested object")))
                        }
                    };
                    record.insert(key.clone(), converted);
                }
                Ok(DisplayState::Record(record))
            }
            other => Err(unsupported(&format!("top-level {}", json_kind(other)))),
        }
    }

    /// Single-field record `{"lastScore": score}`.
    pub fn last_score(score: f64) -> Self {
        let mut record = BTreeMap::new();
        record.insert(LAST_SCORE_KEY.to_owned(), StateValue::Number(score));
        DisplayState::Record(record)
    }

    /// Extract an ordered score list.
    ///
    /// A bare [`DisplayState::Scores`] is returned as-is; a record yields the
    /// numeric list stored under `field`, if any.
    pub fn score_list(&self, field: &str) -> Option<&[f64]> {
        match self {
            DisplayState::Scores(scores) => Some(scores),
            DisplayState::Record(record) => match record.get(field) {
                Some(StateValue::Numbers(scores)) => Some(scores),
                _ => None,
            },
        }
    }

    /// Look up a record field. Always `None` for a bare score list.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            DisplayState::Record(record) => record.get(key),
            DisplayState::Scores(_) => None,
        }
    }
}

fn numbers(items: &[serde_json::Value]) -> Option<Vec<f64>> {
    items.iter().map(serde_json::Value::as_f64).collect()
}

fn unsupported(details: &str) -> TraceError {
    TraceError::UnsupportedDisplayState {
        details: details.to_owned(),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
