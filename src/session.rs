//! Sessions: isolation boundaries.
//!
//! A session groups one storage/network partition with the extensions
//! loaded into it and the tabs and windows observed in it. Sessions are
//! created explicitly and live until the host is dropped. Extension storage
//! lives under a directory of its own per partition, so the same extension
//! loaded into two sessions never shares a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::api::cookies::CookieStore;
use crate::contents::{ContentsId, ContentsRef, WebContents};
use crate::error::BridgeResult;
use crate::extension::{ContentScript, Extension, ExtensionId};
use crate::identity::IdentityRegistry;
use crate::ipc::channel::SessionId;
use crate::sync::{read, write};

#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Partition name shared by every content handle of the session.
    pub partition: String,
    /// URL prefixes that never receive content scripts. Added to the
    /// configured defaults.
    pub injection_blacklist: Vec<String>,
    pub cookies: Option<Arc<dyn CookieStore>>,
}

impl SessionOptions {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Default::default()
        }
    }

    pub fn with_cookies(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn with_blacklist(mut self, prefixes: Vec<String>) -> Self {
        self.injection_blacklist = prefixes;
        self
    }
}

pub struct Session {
    id: SessionId,
    partition: String,
    storage_root: PathBuf,
    extensions: RwLock<HashMap<ExtensionId, Arc<Extension>>>,
    pub registry: IdentityRegistry,
    blacklist: Vec<String>,
    cookies: Option<Arc<dyn CookieStore>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("partition", &self.partition)
            .field("extensions", &read(&self.extensions).len())
            .finish()
    }
}

impl Session {
    fn new(id: SessionId, options: SessionOptions, storage_root: PathBuf) -> Self {
        Self {
            id,
            partition: options.partition,
            storage_root,
            extensions: RwLock::new(HashMap::new()),
            registry: IdentityRegistry::new(),
            blacklist: options.injection_blacklist,
            cookies: options.cookies,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Whether `contents` lives in this session's partition.
    pub fn owns(&self, contents: &dyn WebContents) -> bool {
        contents.partition() == self.partition
    }

    pub fn cookie_store(&self) -> Option<Arc<dyn CookieStore>> {
        self.cookies.clone()
    }

    // ─── Extensions ─────────────────────────────────────────────────────────

    /// Load an unpacked extension. Loading a directory whose id is already
    /// present returns the existing extension and `false`.
    pub async fn load_extension(&self, dir: &Path) -> BridgeResult<(Arc<Extension>, bool)> {
        if let Some(name) = dir.file_name().and_then(|name| name.to_str()) {
            if let Some(existing) = self.extension(name) {
                return Ok((existing, false));
            }
        }

        let extension = Arc::new(Extension::load(dir, &self.storage_root).await?);

        let mut extensions = write(&self.extensions);
        if let Some(existing) = extensions.get(&extension.id) {
            return Ok((Arc::clone(existing), false));
        }
        extensions.insert(extension.id.clone(), Arc::clone(&extension));
        Ok((extension, true))
    }

    pub fn unload_extension(&self, id: &str) -> Option<Arc<Extension>> {
        let removed = write(&self.extensions).remove(id);
        if let Some(extension) = &removed {
            extension.set_background_contents(None);
            tracing::info!(session_id = self.id, extension_id = id, "unloaded extension");
        }
        removed
    }

    pub fn extension(&self, id: &str) -> Option<Arc<Extension>> {
        read(&self.extensions).get(id).cloned()
    }

    /// Loaded extensions, ordered by id.
    pub fn extensions(&self) -> Vec<Arc<Extension>> {
        let mut list: Vec<_> = read(&self.extensions).values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// The extension whose background page is `contents_id`.
    pub fn extension_for_background(&self, contents_id: ContentsId) -> Option<Arc<Extension>> {
        read(&self.extensions)
            .values()
            .find(|extension| extension.is_background_page(contents_id))
            .cloned()
    }

    pub fn background_pages(&self) -> Vec<ContentsRef> {
        self.extensions()
            .iter()
            .filter_map(|extension| extension.background_contents())
            .collect()
    }

    // ─── Content scripts ────────────────────────────────────────────────────

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.blacklist.iter().any(|prefix| url.starts_with(prefix.as_str()))
    }

    /// Content scripts to inject into a page at `url`.
    pub async fn content_scripts_for(&self, url: &str) -> Vec<(ExtensionId, ContentScript)> {
        if self.is_blacklisted(url) {
            return Vec::new();
        }

        let mut selected = Vec::new();
        for extension in self.extensions() {
            for script in extension.content_scripts().await {
                if script.matches(url) {
                    selected.push((extension.id.clone(), script.clone()));
                }
            }
        }
        selected
    }
}

/// Owns every session of one host.
pub struct SessionRegistry {
    next_id: AtomicU32,
    sessions: RwLock<Vec<Arc<Session>>>,
    storage_root: PathBuf,
    default_blacklist: Vec<String>,
}

impl SessionRegistry {
    pub fn new(storage_root: PathBuf, default_blacklist: Vec<String>) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            sessions: RwLock::new(Vec::new()),
            storage_root,
            default_blacklist,
        }
    }

    /// Create a session. A partition already owned by a session maps to
    /// that session, since one handle can only belong to one of them.
    pub fn create(&self, mut options: SessionOptions) -> Arc<Session> {
        let mut sessions = write(&self.sessions);

        if let Some(existing) = sessions.iter().find(|s| s.partition == options.partition) {
            tracing::warn!(
                session_id = existing.id,
                partition = %options.partition,
                "partition already has a session, reusing it"
            );
            return Arc::clone(existing);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut blacklist = self.default_blacklist.clone();
        blacklist.append(&mut options.injection_blacklist);
        options.injection_blacklist = blacklist;

        let storage_root = partition_storage_root(&self.storage_root, &options.partition);
        let session = Arc::new(Session::new(id, options, storage_root));
        sessions.push(Arc::clone(&session));

        tracing::info!(session_id = id, partition = %session.partition, "created session");
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        read(&self.sessions).iter().find(|s| s.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        read(&self.sessions).clone()
    }

    /// The session a calling context belongs to.
    ///
    /// Content views are matched by partition. Background pages live in a
    /// partition of their own, so when that fails every session's
    /// extensions are searched for a background page with the caller's id.
    /// `None` means the caller is unauthenticated.
    pub fn resolve(&self, caller: &dyn WebContents) -> Option<Arc<Session>> {
        let sessions = read(&self.sessions);

        let partition = caller.partition();
        if let Some(session) = sessions.iter().find(|s| s.partition == partition) {
            return Some(Arc::clone(session));
        }

        let caller_id = caller.id();
        sessions
            .iter()
            .find(|s| s.extension_for_background(caller_id).is_some())
            .cloned()
    }
}

/// `<root>/partition-<percent-encoded name>`. Stable across restarts for
/// persistent partitions and distinct for every partition name.
fn partition_storage_root(root: &Path, partition: &str) -> PathBuf {
    root.join(format!("partition-{}", urlencoding::encode(partition)))
}
