//! Pending (not yet applied) transformation parameters
//!
//! The form collects user input per edit type. Each edit type carries its own
//! parameter record, so a `prompt` can only land where a prompt makes sense
//! and a replacement colour can only land on a recolor edit. When the user
//! presses Apply the whole accumulator is rendered to a JSON mapping and
//! merged into the applied configuration (see `state::config`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EditorError, Result};

/// The kind of transformation a form session edits
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EditType {
    Restore,
    RemoveBackground,
    Fill,
    Remove,
    Recolor,
}

impl EditType {
    pub const ALL: [Self; 5] = [
        Self::Restore,
        Self::RemoveBackground,
        Self::Fill,
        Self::Remove,
        Self::Recolor,
    ];

    /// Key used for this edit type inside a transformation configuration
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restore => "restore",
            Self::RemoveBackground => "removeBackground",
            Self::Fill => "fill",
            Self::Remove => "remove",
            Self::Recolor => "recolor",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == key)
    }

    /// Whether a typed field can be recorded against this edit type
    pub fn accepts(self, field: TransformField) -> bool {
        matches!(
            (self, field),
            (Self::Remove, TransformField::Prompt)
                | (Self::Recolor, TransformField::Prompt)
                | (Self::Recolor, TransformField::Color)
        )
    }
}

impl fmt::Display for EditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text fields that feed a pending edit through the debounce channel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TransformField {
    /// Object description (remove / recolor)
    Prompt,
    /// Replacement colour (recolor)
    Color,
}

impl TransformField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Color => "color",
        }
    }

    /// Key the field's value is stored under in the configuration
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Color => "to",
        }
    }
}

impl fmt::Display for TransformField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameters for one edit type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditParams {
    /// Generative fill; `to` is the target aspect ratio (e.g. "16:9")
    Fill { to: Option<String> },
    Remove { prompt: Option<String> },
    /// `to` is the replacement colour
    Recolor {
        prompt: Option<String>,
        to: Option<String>,
    },
    Restore,
    RemoveBackground,
}

impl EditParams {
    /// Parameters with nothing set yet
    pub fn empty(edit_type: EditType) -> Self {
        match edit_type {
            EditType::Fill => Self::Fill { to: None },
            EditType::Remove => Self::Remove { prompt: None },
            EditType::Recolor => Self::Recolor { prompt: None, to: None },
            EditType::Restore => Self::Restore,
            EditType::RemoveBackground => Self::RemoveBackground,
        }
    }

    pub fn edit_type(&self) -> EditType {
        match self {
            Self::Fill { .. } => EditType::Fill,
            Self::Remove { .. } => EditType::Remove,
            Self::Recolor { .. } => EditType::Recolor,
            Self::Restore => EditType::Restore,
            Self::RemoveBackground => EditType::RemoveBackground,
        }
    }

    /// Set a single field, leaving every other field untouched
    pub fn set_field(&mut self, field: TransformField, value: String) -> Result<()> {
        let slot = match (self, field) {
            (Self::Remove { prompt }, TransformField::Prompt) => prompt,
            (Self::Recolor { prompt, .. }, TransformField::Prompt) => prompt,
            (Self::Recolor { to, .. }, TransformField::Color) => to,
            (params, field) => {
                return Err(EditorError::FieldNotApplicable {
                    field,
                    edit_type: params.edit_type(),
                })
            }
        };
        *slot = Some(value);
        Ok(())
    }

    /// Set the target ratio; returns false for edit types without one
    pub fn set_aspect_ratio(&mut self, ratio: &str) -> bool {
        match self {
            Self::Fill { to } => {
                *to = Some(ratio.to_string());
                true
            }
            _ => false,
        }
    }

    /// Write the fields that are set into a configuration entry
    fn write_into(&self, entry: &mut Map<String, Value>) {
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                entry.insert(key.to_string(), Value::String(v.clone()));
            }
        };
        match self {
            Self::Fill { to } => put("to", to),
            Self::Remove { prompt } => put(TransformField::Prompt.config_key(), prompt),
            Self::Recolor { prompt, to } => {
                put(TransformField::Prompt.config_key(), prompt);
                put(TransformField::Color.config_key(), to);
            }
            Self::Restore | Self::RemoveBackground => {}
        }
    }
}

/// One edit type's slot in the accumulator
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub params: EditParams,
    /// Catalog defaults seeded by ratio selection or explicit arming
    pub defaults: Map<String, Value>,
}

impl PendingEntry {
    pub fn new(edit_type: EditType) -> Self {
        Self {
            params: EditParams::empty(edit_type),
            defaults: Map::new(),
        }
    }

    /// Render as a configuration entry; typed fields win over defaults
    pub fn to_entry(&self) -> Map<String, Value> {
        let mut entry = self.defaults.clone();
        self.params.write_into(&mut entry);
        entry
    }
}

/// The in-progress edit, keyed by edit type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingEdit {
    entries: BTreeMap<EditType, PendingEntry>,
}

impl PendingEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, edit_type: EditType) -> Option<&PendingEntry> {
        self.entries.get(&edit_type)
    }

    pub fn edit_types(&self) -> impl Iterator<Item = EditType> + '_ {
        self.entries.keys().copied()
    }

    fn entry(&mut self, edit_type: EditType) -> &mut PendingEntry {
        self.entries
            .entry(edit_type)
            .or_insert_with(|| PendingEntry::new(edit_type))
    }

    /// Shallow-merge one settled field value into the entry for `edit_type`
    pub fn record(&mut self, edit_type: EditType, field: TransformField, value: String) -> Result<()> {
        if !edit_type.accepts(field) {
            return Err(EditorError::FieldNotApplicable { field, edit_type });
        }
        self.entry(edit_type).params.set_field(field, value)
    }

    /// Seed the entry for `edit_type` with catalog defaults
    ///
    /// Typed fields already recorded for that edit type are kept.
    pub fn arm(&mut self, edit_type: EditType, defaults: &Map<String, Value>) -> &mut PendingEntry {
        let entry = self.entry(edit_type);
        entry.defaults = defaults.clone();
        entry
    }

    /// Render the accumulator as a transformation configuration mapping
    pub fn to_config(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(edit_type, entry)| (edit_type.as_str().to_string(), Value::Object(entry.to_entry())))
            .collect()
    }
}
