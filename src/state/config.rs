//! Applied transformation configuration and the deep merge that produces it
//!
//! The applied configuration is what the render collaborator turns into an
//! image request. It is never edited in place: each Apply builds a fresh
//! value from the previous one plus the pending edit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::edit::{EditType, PendingEdit};
use crate::error::{EditorError, Result};

/// Authoritative configuration, keyed by edit type name
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct AppliedConfiguration(Map<String, Value>);

impl AppliedConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; only objects (or null, as empty) are accepted
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            _ => Err(EditorError::merge_input(ROOT)),
        }
    }

    /// Parse from a JSON string (e.g. a stored record)
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, edit_type: EditType) -> Option<&Value> {
        self.0.get(edit_type.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Next configuration after applying `pending` on top of this one
    pub fn merged_with(&self, pending: Option<&PendingEdit>) -> Self {
        merge(pending, Some(self))
    }
}

impl From<AppliedConfiguration> for Value {
    fn from(config: AppliedConfiguration) -> Self {
        config.into_value()
    }
}

const ROOT: &str = "<root>";

/// Merge a pending edit into the applied configuration
///
/// Missing inputs count as empty mappings. Neither input is modified. If the
/// two sides disagree on shape (a mapping on one side, a plain value on the
/// other) nothing is merged and the applied side comes back unchanged.
pub fn merge(pending: Option<&PendingEdit>, applied: Option<&AppliedConfiguration>) -> AppliedConfiguration {
    try_merge(pending, applied).unwrap_or_else(|err| {
        warn!(error = %err, "transformation merge failed closed, keeping applied configuration");
        applied.cloned().unwrap_or_default()
    })
}

/// Like [`merge`], but reports a shape conflict as `MergeInputInvalid`
pub fn try_merge(pending: Option<&PendingEdit>, applied: Option<&AppliedConfiguration>) -> Result<AppliedConfiguration> {
    let incoming = pending.map(PendingEdit::to_config).unwrap_or_default();
    let empty = Map::new();
    let base = applied.map(AppliedConfiguration::as_map).unwrap_or(&empty);
    merge_maps(&incoming, base, ROOT).map(AppliedConfiguration)
}

/// Deep-merge two raw JSON values, `pending` winning at every level
///
/// Both values must be objects (null is read as an empty object).
pub fn deep_merge(pending: &Value, applied: &Value) -> Result<Value> {
    let empty = Map::new();
    let pending_map = match pending {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(EditorError::merge_input(ROOT)),
    };
    let applied_map = match applied {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(EditorError::merge_input(ROOT)),
    };
    merge_maps(pending_map, applied_map, ROOT).map(Value::Object)
}

fn merge_maps(pending: &Map<String, Value>, applied: &Map<String, Value>, path: &str) -> Result<Map<String, Value>> {
    let mut out = applied.clone();
    for (key, incoming) in pending {
        let child = if path == ROOT {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        let merged = match (applied.get(key), incoming) {
            (Some(Value::Object(current)), Value::Object(next)) => Value::Object(merge_maps(next, current, &child)?),
            (Some(Value::Object(_)), _) | (Some(_), Value::Object(_)) => {
                return Err(EditorError::merge_input(child));
            }
            _ => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Ok(out)
}
