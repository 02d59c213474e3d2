//! Extension storage areas.
//!
//! Each (extension, area) pair is backed by one JSON document that is read
//! fully and rewritten fully on every mutation. Operations on the same area
//! run one at a time in arrival order so concurrent writers never interleave
//! partial writes to the backing file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::error::{BridgeError, BridgeResult};

/// Key-value document stored for one area.
pub type StorageMap = Map<String, Value>;

/// Per-key change records, `{key: {oldValue, newValue}}`, as delivered to
/// `storage.onChanged`.
pub type StorageChanges = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageAreaName {
    Local,
    Sync,
    Managed,
}

impl StorageAreaName {
    pub const ALL: [StorageAreaName; 3] = [Self::Local, Self::Sync, Self::Managed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
            Self::Managed => "managed",
        }
    }
}

/// Keys requested by `storage.<area>.get`.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageQuery {
    /// `null`: the whole document.
    All,
    Key(String),
    Keys(Vec<String>),
    /// An object of keys with fallback values for missing entries.
    Defaults(StorageMap),
}

impl From<Value> for StorageQuery {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::All,
            Value::String(key) => Self::Key(key),
            Value::Array(keys) => Self::Keys(
                keys.into_iter()
                    .filter_map(|key| key.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::Object(defaults) => Self::Defaults(defaults),
            // Anything else selects nothing.
            _ => Self::Keys(Vec::new()),
        }
    }
}

/// One storage area of one extension.
pub struct StorageArea {
    extension_id: String,
    area: StorageAreaName,
    path: PathBuf,
    queue: Mutex<()>,
}

impl std::fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageArea")
            .field("extension_id", &self.extension_id)
            .field("area", &self.area)
            .field("path", &self.path)
            .finish()
    }
}

impl StorageArea {
    pub fn new(extension_id: &str, area: StorageAreaName, path: PathBuf) -> Self {
        Self {
            extension_id: extension_id.to_string(),
            area,
            path,
            queue: Mutex::new(()),
        }
    }

    pub fn area(&self) -> StorageAreaName {
        self.area
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, query: StorageQuery) -> StorageMap {
        let _turn = self.queue.lock().await;
        let data = self.read_document().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "storage area unreadable, answering empty");
            StorageMap::new()
        });

        match query {
            StorageQuery::All => data,
            StorageQuery::Key(key) => pick(&data, std::iter::once(key)),
            StorageQuery::Keys(keys) => pick(&data, keys),
            StorageQuery::Defaults(defaults) => defaults
                .into_iter()
                .map(|(key, fallback)| {
                    let value = data.get(&key).cloned().unwrap_or(fallback);
                    (key, value)
                })
                .collect(),
        }
    }

    /// Merge `items` into the document.
    pub async fn set(&self, items: StorageMap) -> BridgeResult<StorageChanges> {
        let _turn = self.queue.lock().await;
        let mut data = self.read_document().await?;
        let mut changes = StorageChanges::new();

        for (key, value) in items {
            let old = data.insert(key.clone(), value.clone());
            changes.insert(key, change_record(old, Some(value)));
        }

        self.write_document(&data).await?;
        Ok(changes)
    }

    pub async fn remove(&self, keys: &[String]) -> BridgeResult<StorageChanges> {
        let _turn = self.queue.lock().await;
        let mut data = self.read_document().await?;
        let mut changes = StorageChanges::new();

        for key in keys {
            if let Some(old) = data.remove(key) {
                changes.insert(key.clone(), change_record(Some(old), None));
            }
        }

        self.write_document(&data).await?;
        Ok(changes)
    }

    pub async fn clear(&self) -> BridgeResult<StorageChanges> {
        let _turn = self.queue.lock().await;
        let data = self.read_document().await?;

        let changes = data
            .into_iter()
            .map(|(key, old)| (key, change_record(Some(old), None)))
            .collect();

        self.write_document(&StorageMap::new()).await?;
        Ok(changes)
    }

    /// A missing document reads as empty. Anything else that cannot be
    /// read back as a JSON object is an error, so a mutation never
    /// overwrites data it failed to load.
    async fn read_document(&self) -> BridgeResult<StorageMap> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StorageMap::new()),
            Err(e) => return Err(self.storage_error(e)),
        };

        match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(self.storage_failure("document is not a JSON object")),
            Err(e) => Err(self.storage_failure(&e.to_string())),
        }
    }

    async fn write_document(&self, data: &StorageMap) -> BridgeResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_error(e))?;
        }

        let contents = serde_json::to_string(data)?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| self.storage_error(e))
    }

    fn storage_error(&self, e: std::io::Error) -> BridgeError {
        self.storage_failure(&e.to_string())
    }

    fn storage_failure(&self, message: &str) -> BridgeError {
        BridgeError::Storage {
            extension: self.extension_id.clone(),
            message: format!("{} area: {message}", self.area.as_str()),
        }
    }
}

fn pick(data: &StorageMap, keys: impl IntoIterator<Item = String>) -> StorageMap {
    keys.into_iter()
        .filter_map(|key| data.get(&key).cloned().map(|value| (key, value)))
        .collect()
}

fn change_record(old: Option<Value>, new: Option<Value>) -> Value {
    let mut record = Map::new();
    if let Some(old) = old {
        record.insert("oldValue".to_string(), old);
    }
    if let Some(new) = new {
        record.insert("newValue".to_string(), new);
    }
    Value::Object(record)
}

/// The three storage areas of one extension, stored under
/// `<root>/<extension id>/<area>`.
#[derive(Debug)]
pub struct ExtensionStorage {
    pub local: StorageArea,
    pub sync: StorageArea,
    pub managed: StorageArea,
}

impl ExtensionStorage {
    pub fn new(extension_id: &str, root: &Path) -> Self {
        let dir = root.join(extension_id);
        let area = |name: StorageAreaName| {
            StorageArea::new(extension_id, name, dir.join(name.as_str()))
        };

        Self {
            local: area(StorageAreaName::Local),
            sync: area(StorageAreaName::Sync),
            managed: area(StorageAreaName::Managed),
        }
    }

    pub fn area(&self, name: StorageAreaName) -> &StorageArea {
        match name {
            StorageAreaName::Local => &self.local,
            StorageAreaName::Sync => &self.sync,
            StorageAreaName::Managed => &self.managed,
        }
    }
}

/// Arguments of a `storage.onChanged` event.
pub fn changed_event_args(changes: StorageChanges, area: StorageAreaName) -> Vec<Value> {
    vec![Value::Object(changes), json!(area.as_str())]
}
