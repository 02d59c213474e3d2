//! Loaded extensions.
//!
//! An [`Extension`] is created from an unpacked directory: the manifest is
//! parsed and validated, the background document is prepared, and the three
//! storage areas are opened. Content scripts are only read from disk the
//! first time a page asks for them.

mod content_scripts;
mod manifest;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;

pub use content_scripts::{ContentScript, ScriptFile};
pub use manifest::{
    ActionConfig, BackgroundConfig, ChromeManifest, ContentScriptConfig, RunAt, MANIFEST_FILE,
};

use crate::api::alarms::AlarmList;
use crate::api::browser_action::BadgeState;
use crate::contents::{ContentsId, ContentsRef};
use crate::error::{BridgeError, BridgeResult};
use crate::storage::ExtensionStorage;
use crate::sync::{read, write};

/// Extension identifier (install directory name).
pub type ExtensionId = String;

/// File name used when the background is declared as a script list.
pub const GENERATED_BACKGROUND: &str = "generated.html";

/// The document served as an extension's background page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundDocument {
    pub file_name: String,
    pub html: Vec<u8>,
}

impl BackgroundDocument {
    async fn prepare(dir: &Path, config: &BackgroundConfig) -> BridgeResult<Option<Self>> {
        if let Some(page) = &config.page {
            let path = dir.join(page.trim_start_matches('/'));
            let html = tokio::fs::read(&path)
                .await
                .map_err(|e| BridgeError::ManifestInvalid {
                    path: path.clone(),
                    message: format!("background page unreadable: {e}"),
                })?;
            return Ok(Some(Self {
                file_name: page.trim_start_matches('/').to_string(),
                html,
            }));
        }

        if config.scripts.is_empty() {
            return Ok(None);
        }

        let tags: String = config
            .scripts
            .iter()
            .map(|script| format!("<script src=\"{script}\"></script>"))
            .collect();

        Ok(Some(Self {
            file_name: GENERATED_BACKGROUND.to_string(),
            html: format!("<html><body>{tags}</body></html>").into_bytes(),
        }))
    }
}

/// Serializable snapshot handed to renderer contexts. Carries no storage
/// or background handles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub id: ExtensionId,
    pub path: PathBuf,
    pub manifest: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup_page: Option<String>,
    pub content_scripts: Vec<ContentScript>,
}

pub struct Extension {
    pub id: ExtensionId,
    pub path: PathBuf,
    pub manifest: ChromeManifest,
    pub storage: ExtensionStorage,
    background: Option<BackgroundDocument>,
    background_contents: RwLock<Option<ContentsRef>>,
    content_scripts: OnceCell<Vec<ContentScript>>,
    pub(crate) alarms: AlarmList,
    pub(crate) badge: BadgeState,
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.manifest.name)
            .field("background", &self.background_file())
            .finish()
    }
}

impl Extension {
    /// Load an unpacked extension. Storage lives under
    /// `<storage_root>/<id>/<area>`.
    pub async fn load(dir: &Path, storage_root: &Path) -> BridgeResult<Self> {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(BridgeError::NotADirectory(dir.to_path_buf()));
        }

        let manifest = ChromeManifest::load(dir)?;
        let id = extension_id_for(dir)?;

        let background = match &manifest.background {
            Some(config) => BackgroundDocument::prepare(dir, config).await?,
            None => None,
        };

        tracing::info!(extension_id = %id, name = %manifest.name, "loaded extension");

        Ok(Self {
            storage: ExtensionStorage::new(&id, storage_root),
            id,
            path: dir.to_path_buf(),
            manifest,
            background,
            background_contents: RwLock::new(None),
            content_scripts: OnceCell::new(),
            alarms: AlarmList::default(),
            badge: BadgeState::default(),
        })
    }

    pub fn background(&self) -> Option<&BackgroundDocument> {
        self.background.as_ref()
    }

    pub fn background_file(&self) -> Option<&str> {
        self.background.as_ref().map(|doc| doc.file_name.as_str())
    }

    pub fn background_contents(&self) -> Option<ContentsRef> {
        read(&self.background_contents).clone()
    }

    pub fn is_background_page(&self, contents_id: ContentsId) -> bool {
        read(&self.background_contents)
            .as_ref()
            .is_some_and(|contents| contents.id() == contents_id)
    }

    pub(crate) fn set_background_contents(&self, contents: Option<ContentsRef>) {
        *write(&self.background_contents) = contents;
    }

    pub fn popup_page(&self) -> Option<&str> {
        self.manifest.popup_page()
    }

    /// Compiled content scripts, read from disk on first use.
    pub async fn content_scripts(&self) -> &[ContentScript] {
        self.content_scripts
            .get_or_init(|| async {
                let mut scripts = Vec::with_capacity(self.manifest.content_scripts.len());
                for config in &self.manifest.content_scripts {
                    scripts.push(ContentScript::compile(&self.path, config).await);
                }
                scripts
            })
            .await
    }

    pub async fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            id: self.id.clone(),
            path: self.path.clone(),
            manifest: self.manifest.to_value(),
            popup_page: self.popup_page().map(str::to_string),
            content_scripts: self.content_scripts().await.to_vec(),
        }
    }
}

fn extension_id_for(dir: &Path) -> BridgeResult<ExtensionId> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::NotADirectory(dir.to_path_buf()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};

    /// Write an unpacked extension named `id` under `root`.
    pub fn write_extension(root: &Path, id: &str, manifest: &serde_json::Value) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
        dir
    }
}
