//! Settings - JSON configuration with per-field defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub assets: AssetSettings,
    #[serde(default)]
    pub gallery: GallerySettings,
}

impl Settings {
    /// Missing file means defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default)]
    pub ttl_override_secs: Option<u64>,
    #[serde(default = "default_object_ttl_secs")]
    pub object_ttl_secs: u64,
}

fn default_namespace() -> String { "fragment_render".to_string() }
fn default_ttl_secs() -> u64 { 3600 }
fn default_object_ttl_secs() -> u64 { 43_200 }

impl CacheSettings {
    /// Override wins over the static default.
    pub fn effective_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_override_secs.unwrap_or(self.default_ttl_secs))
    }

    pub fn object_ttl(&self) -> Duration {
        Duration::from_secs(self.object_ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_ttl_secs: default_ttl_secs(),
            ttl_override_secs: None,
            object_ttl_secs: default_object_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSettings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_baseline_excluded")]
    pub baseline_excluded: Vec<String>,
    #[serde(default = "default_editor_only")]
    pub editor_only: Vec<String>,
    #[serde(default = "default_editor_only_prefixes")]
    pub editor_only_prefixes: Vec<String>,
    #[serde(default = "default_variation_handle")]
    pub variation_handle: String,
    #[serde(default = "default_variation_css_name")]
    pub variation_css_name: String,
}

fn default_baseline_excluded() -> Vec<String> {
    ["wp-block-library", "wp-block-library-theme", "global-styles", "classic-theme-styles", "core-block-supports"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_editor_only() -> Vec<String> {
    ["wp-edit-blocks", "wp-editor", "wp-block-editor", "wp-components", "wp-reusable-blocks", "wp-format-library"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_editor_only_prefixes() -> Vec<String> { vec!["wp-edit-".to_string()] }
fn default_variation_handle() -> String { "block-style-variation-styles".to_string() }
fn default_variation_css_name() -> String { "block-style-variations".to_string() }

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            baseline_excluded: default_baseline_excluded(),
            editor_only: default_editor_only(),
            editor_only_prefixes: default_editor_only_prefixes(),
            variation_handle: default_variation_handle(),
            variation_css_name: default_variation_css_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GallerySettings {
    #[serde(default = "default_container_class")]
    pub container_class: String,
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,
    #[serde(default = "default_modal_size")]
    pub modal_size: String,
    #[serde(default = "default_close_buttons")]
    pub close_buttons: String,
    #[serde(default = "default_image_navigation")]
    pub image_navigation: String,
}

fn default_container_class() -> String { "wp-block-image".to_string() }
fn default_id_attribute() -> String { "data-id".to_string() }
fn default_modal_size() -> String { "medium".to_string() }
fn default_close_buttons() -> String { "both".to_string() }
fn default_image_navigation() -> String { "arrows".to_string() }

impl Default for GallerySettings {
    fn default() -> Self {
        Self {
            container_class: default_container_class(),
            id_attribute: default_id_attribute(),
            modal_size: default_modal_size(),
            close_buttons: default_close_buttons(),
            image_navigation: default_image_navigation(),
        }
    }
}
