//! Static catalogs and engine configuration
//!
//! The aspect ratio and transformation catalogs are read-only data loaded
//! once at start-up and shared between sessions behind an `Arc`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{EditorError, Result};
use crate::state::edit::EditType;

/// One entry of the aspect ratio selector
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AspectRatioOption {
    pub key: String,
    pub label: String,
    pub aspect_ratio: String,
    pub width: u32,
    pub height: u32,
}

impl AspectRatioOption {
    fn new(key: &str, label: &str, width: u32, height: u32) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            aspect_ratio: key.to_string(),
            width,
            height,
        }
    }
}

/// Ordered list of selectable aspect ratios
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct AspectRatioCatalog(Vec<AspectRatioOption>);

impl AspectRatioCatalog {
    pub fn new(options: Vec<AspectRatioOption>) -> Self {
        Self(options)
    }

    /// Look up a ratio by key
    ///
    /// The selector is populated from this same catalog, so a miss means the
    /// UI and catalog are out of sync.
    pub fn resolve(&self, key: &str) -> Result<&AspectRatioOption> {
        self.0
            .iter()
            .find(|option| option.key == key)
            .ok_or_else(|| EditorError::UnknownRatioKey(key.to_string()))
    }

    pub fn options(&self) -> &[AspectRatioOption] {
        &self.0
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|option| option.key.as_str())
    }
}

impl Default for AspectRatioCatalog {
    fn default() -> Self {
        Self(vec![
            AspectRatioOption::new("1:1", "Square (1:1)", 1000, 1000),
            AspectRatioOption::new("3:4", "Standard Portrait (3:4)", 1000, 1334),
            AspectRatioOption::new("9:16", "Phone Portrait (9:16)", 1000, 1778),
        ])
    }
}

/// Descriptor of one transformation kind
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationType {
    #[serde(rename = "type")]
    pub edit_type: EditType,
    pub title: String,
    #[serde(default)]
    pub sub_title: String,
    /// Entry seeded into the pending edit when the type is armed
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub icon: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct TransformationCatalog(Vec<TransformationType>);

impl TransformationCatalog {
    pub fn new(types: Vec<TransformationType>) -> Self {
        Self(types)
    }

    pub fn get(&self, edit_type: EditType) -> Option<&TransformationType> {
        self.0.iter().find(|t| t.edit_type == edit_type)
    }

    /// Default configuration entry for an edit type (empty if uncatalogued)
    pub fn default_config(&self, edit_type: EditType) -> Map<String, Value> {
        self.get(edit_type).map(|t| t.config.clone()).unwrap_or_default()
    }

    pub fn types(&self) -> &[TransformationType] {
        &self.0
    }
}

fn transformation(edit_type: EditType, title: &str, sub_title: &str, config: Value, icon: &str) -> TransformationType {
    TransformationType {
        edit_type,
        title: title.to_string(),
        sub_title: sub_title.to_string(),
        config: match config {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        icon: icon.to_string(),
    }
}

impl Default for TransformationCatalog {
    fn default() -> Self {
        Self(vec![
            transformation(
                EditType::Restore,
                "Restore Image",
                "Refine images by removing noise and imperfections",
                json!({ "restore": true }),
                "image.svg",
            ),
            transformation(
                EditType::RemoveBackground,
                "Background Remove",
                "Removes the background of the image using AI",
                json!({ "removeBackground": true }),
                "camera.svg",
            ),
            transformation(
                EditType::Fill,
                "Generative Fill",
                "Enhance an image's dimensions using AI outpainting",
                json!({ "fillBackground": true }),
                "stars.svg",
            ),
            transformation(
                EditType::Remove,
                "Object Remove",
                "Identify and eliminate objects from images",
                json!({ "prompt": "", "removeShadow": true, "multiple": true }),
                "scan.svg",
            ),
            transformation(
                EditType::Recolor,
                "Object Recolor",
                "Identify and recolor objects from the image",
                json!({ "prompt": "", "to": "", "multiple": true }),
                "filter.svg",
            ),
        ])
    }
}

/// Engine configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorConfig {
    /// Quiet period before a typed value settles
    pub debounce_ms: u64,
    /// Credit delta charged per apply (negative)
    pub credit_fee: i64,
    pub aspect_ratios: AspectRatioCatalog,
    pub transformations: TransformationCatalog,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            credit_fee: -1,
            aspect_ratios: AspectRatioCatalog::default(),
            transformations: TransformationCatalog::default(),
        }
    }
}

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parse and validate a JSON configuration; missing fields use defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!(path = %path.display(), "loaded editor configuration");
        Ok(config)
    }

    /// Load the user's configuration file if present, otherwise the built-in defaults
    ///
    /// - Linux: ~/.config/transform-session/config.json
    /// - macOS: ~/Library/Application Support/transform-session/config.json
    /// - Windows: %APPDATA%\transform-session\config.json
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("no configuration file found, using built-in catalogs");
                Ok(Self::default())
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("transform-session");
        path.push("config.json");
        Some(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.credit_fee > 0 {
            return Err(EditorError::config(format!(
                "credit fee must not be positive (got {})",
                self.credit_fee
            )));
        }

        let mut seen = HashSet::new();
        for key in self.aspect_ratios.keys() {
            if !seen.insert(key) {
                return Err(EditorError::config(format!("duplicate aspect ratio key `{key}`")));
            }
        }

        for edit_type in EditType::ALL {
            if self.transformations.get(edit_type).is_none() {
                return Err(EditorError::config(format!(
                    "no transformation catalog entry for `{edit_type}`"
                )));
            }
        }
        Ok(())
    }
}
