//! Shared data structures for the form session
//!
//! These structs represent the data model that flows between
//! the session, the upload/render collaborators and the persistence layer.

use serde::{Deserialize, Serialize};

use super::config::AppliedConfiguration;
use super::edit::EditType;
use crate::catalog::AspectRatioOption;
use crate::error::FormError;

/// Whether the form creates a new record or edits an existing one
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormAction {
    #[default]
    Add,
    Update,
}

/// View state of the image being edited
///
/// Owned by the form. The upload hook and ratio selection are the only writers.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub public_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub secure_url: Option<String>,
}

impl ImageDescriptor {
    /// Adopt the target dimensions of an aspect ratio option
    pub fn apply_ratio(&mut self, option: &AspectRatioOption) {
        self.aspect_ratio = Some(option.aspect_ratio.clone());
        self.width = Some(option.width);
        self.height = Some(option.height);
    }

    pub fn has_image(&self) -> bool {
        !self.public_id.is_empty()
    }
}

/// Result reported by the upload widget
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub public_id: String,
    pub width: u32,
    pub height: u32,
    pub secure_url: String,
}

/// Values of the form fields
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormValues {
    pub title: String,
    pub aspect_ratio: Option<String>,
    pub color: Option<String>,
    pub prompt: Option<String>,
    pub public_id: String,
}

impl FormValues {
    /// Check the values are complete enough to save
    pub fn validate(&self) -> Result<(), FormError> {
        if self.public_id.trim().is_empty() {
            return Err(FormError::MissingImage);
        }
        Ok(())
    }
}

/// A stored transformation, as loaded for an Update session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: i64,
    pub title: String,
    pub edit_type: EditType,
    pub public_id: String,
    pub secure_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub color: Option<String>,
    pub prompt: Option<String>,
    pub config: Option<AppliedConfiguration>,
    pub author_id: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    /// Unix timestamp (seconds)
    pub updated_at: i64,
}

impl ImageRecord {
    /// Initial form values when editing this record
    pub fn form_values(&self) -> FormValues {
        FormValues {
            title: self.title.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            color: self.color.clone(),
            prompt: self.prompt.clone(),
            public_id: self.public_id.clone(),
        }
    }

    pub fn image(&self) -> ImageDescriptor {
        ImageDescriptor {
            public_id: self.public_id.clone(),
            width: self.width,
            height: self.height,
            aspect_ratio: self.aspect_ratio.clone(),
            secure_url: self.secure_url.clone(),
        }
    }
}

/// What a Save hands to the persistence collaborator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRecord {
    /// Set when updating an existing record
    pub id: Option<i64>,
    pub title: String,
    pub edit_type: EditType,
    pub public_id: String,
    pub secure_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub color: Option<String>,
    pub prompt: Option<String>,
    pub config: AppliedConfiguration,
    pub author_id: String,
}
