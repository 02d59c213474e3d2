//! Chrome extension manifest parsing.
//!
//! Only the keys the bridge acts on are typed; everything else is kept in
//! [`ChromeManifest::extra`] so `runtime.getManifest()` sees the whole file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Parsed `manifest.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChromeManifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_locale: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundConfig>,

    #[serde(default)]
    pub content_scripts: Vec<ContentScriptConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_action: Option<ActionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_action: Option<ActionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_page: Option<String>,

    /// Keys the bridge does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChromeManifest {
    /// Load `manifest.json` from an extension directory.
    pub fn load(extension_dir: &Path) -> BridgeResult<Self> {
        let manifest_path = extension_dir.join(MANIFEST_FILE);

        if !manifest_path.is_file() {
            return Err(BridgeError::ManifestNotFound(extension_dir.to_path_buf()));
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        // Some published manifests start with a UTF-8 BOM.
        let content = content.trim_start_matches('\u{feff}');

        let manifest: Self =
            serde_json::from_str(content).map_err(|e| BridgeError::ManifestInvalid {
                path: manifest_path.clone(),
                message: e.to_string(),
            })?;

        manifest.validate().map_err(|message| BridgeError::ManifestInvalid {
            path: manifest_path,
            message,
        })?;

        Ok(manifest)
    }

    /// Check required fields and constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }

        if let Some(version) = self.manifest_version {
            if !(1..=3).contains(&version) {
                return Err(format!("unsupported manifest_version {version}"));
            }
        }

        for (index, script) in self.content_scripts.iter().enumerate() {
            if script.matches.is_empty() {
                return Err(format!("content_scripts[{index}] has no matches"));
            }
        }

        Ok(())
    }

    pub fn popup_page(&self) -> Option<&str> {
        self.browser_action
            .as_ref()
            .or(self.page_action.as_ref())
            .and_then(|action| action.default_popup.as_deref())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// The manifest as JSON, including uninterpreted keys.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `background` section: either an HTML page or a list of scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,

    #[serde(default)]
    pub scripts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    DocumentStart,
    DocumentEnd,
    #[default]
    DocumentIdle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentScriptConfig {
    #[serde(default)]
    pub matches: Vec<String>,

    #[serde(default)]
    pub js: Vec<String>,

    #[serde(default)]
    pub css: Vec<String>,

    #[serde(default)]
    pub run_at: RunAt,

    #[serde(default)]
    pub all_frames: bool,
}

/// `browser_action` / `page_action`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_popup: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_title: Option<String>,

    /// A path or a `{size: path}` map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_icon: Option<Value>,
}
