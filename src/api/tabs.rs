//! `chrome.tabs` over the identity registry.
//!
//! Tabs are created by the embedder (through [`HostDelegate::create_tab`] or
//! by handing the host an existing handle) and tracked by the session's
//! registry. Update triggers refresh the cached details and emit
//! `tabs.onUpdated` with only the fields that changed.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::contents::{ContentsEvent, ContentsId, ContentsRef, TabId, WindowId};
use crate::events::EventBus;
use crate::extension::Extension;
use crate::host::HostDelegate;
use crate::identity::{QueryInfo, TabDetails};
use crate::ipc::channel::TABS_SEND_MESSAGE;
use crate::ipc::types::{CreateProperties, InjectDetails, MessageSender, ReloadProperties, UpdateProperties};
use crate::session::Session;

/// Fields compared to build the `changeInfo` of `tabs.onUpdated`.
const CHANGE_FIELDS: [&str; 9] = [
    "status",
    "url",
    "pinned",
    "audible",
    "discarded",
    "autoDiscardable",
    "mutedInfo",
    "favIconUrl",
    "title",
];

/// The subset of `CHANGE_FIELDS` that differs between two snapshots.
pub fn change_info(previous: &TabDetails, current: &TabDetails) -> Map<String, Value> {
    let before = json!(previous);
    let after = json!(current);

    CHANGE_FIELDS
        .iter()
        .filter(|field| before.get(**field) != after.get(**field))
        .map(|field| {
            let value = after.get(*field).cloned().unwrap_or(Value::Null);
            (field.to_string(), value)
        })
        .collect()
}

pub struct TabsApi {
    bus: Arc<EventBus>,
    delegate: Arc<dyn HostDelegate>,
}

impl TabsApi {
    pub fn new(bus: Arc<EventBus>, delegate: Arc<dyn HostDelegate>) -> Self {
        Self { bus, delegate }
    }

    // ─── Tracking ───────────────────────────────────────────────────────────

    /// Track a tab handle and announce it with `tabs.onCreated`.
    pub fn observe(&self, session: &Session, contents: ContentsRef, window_id: WindowId) {
        let id = contents.id();
        if session.registry.has_tab(id) {
            return;
        }

        self.bus.attach(session.id(), Arc::clone(&contents));
        session.registry.observe_tab(contents, window_id);

        if let Some(details) = session.registry.tab_details(id) {
            self.bus
                .broadcast_in_session(session.id(), "tabs.onCreated", vec![json!(details)]);
        }
        tracing::debug!(session_id = session.id(), tab_id = id, window_id, "tab observed");
    }

    /// React to a lifecycle notification for a tracked tab.
    pub fn handle_event(&self, session: &Session, id: ContentsId, event: &ContentsEvent) {
        match event {
            ContentsEvent::Destroyed => {
                if session.registry.release_tab(id) {
                    for extension in session.extensions() {
                        extension.badge.forget_tab(id);
                    }
                    self.bus
                        .broadcast_in_session(session.id(), "tabs.onRemoved", vec![json!(id)]);
                }
            }
            ContentsEvent::FaviconUpdated { url } => {
                session.registry.set_favicon(id, url.clone());
                self.emit_updated(session, id);
            }
            event if event.refreshes_details() => self.emit_updated(session, id),
            _ => {}
        }
    }

    /// Recompute a tab's details and emit `tabs.onUpdated` when something
    /// visible changed.
    pub fn emit_updated(&self, session: &Session, id: TabId) {
        if let Some((Some(previous), current)) = session.registry.refresh_tab(id) {
            self.emit_changes(session, &previous, &current);
        }
    }

    fn emit_changes(&self, session: &Session, previous: &TabDetails, current: &TabDetails) {
        let changes = change_info(previous, current);
        if changes.is_empty() {
            return;
        }

        self.bus.broadcast_in_session(
            session.id(),
            "tabs.onUpdated",
            vec![json!(current.id), Value::Object(changes), json!(current)],
        );
    }

    /// Make a tab active. Fires `tabs.onActivated` only when the active tab
    /// actually changed.
    pub fn activate(&self, session: &Session, id: TabId) -> bool {
        let Some(window_id) = session.registry.activate_tab(id) else {
            return false;
        };

        if let Some(contents) = session.registry.tab(id) {
            self.delegate.select_tab(session, &contents);
        }

        self.bus.broadcast_in_session(
            session.id(),
            "tabs.onActivated",
            vec![json!({"tabId": id, "windowId": window_id})],
        );
        true
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn get(&self, session: &Session, id: TabId) -> Option<TabDetails> {
        session.registry.tab_details(id)
    }

    /// The tab a calling page lives in. `None` for background contexts.
    pub fn get_current(&self, session: &Session, caller: ContentsId) -> Option<TabDetails> {
        session.registry.tab_details(caller)
    }

    pub fn query(&self, session: &Session, info: &QueryInfo) -> Vec<TabDetails> {
        session.registry.query_tabs(info)
    }

    // ─── Mutations ──────────────────────────────────────────────────────────

    pub async fn update(
        &self,
        session: &Session,
        id: TabId,
        props: &UpdateProperties,
    ) -> Option<TabDetails> {
        let contents = session.registry.tab(id)?;
        let before = session.registry.tab_details(id);

        if let Some(url) = &props.url {
            if let Err(e) = contents.load_url(url).await {
                tracing::warn!(tab_id = id, url = %url, error = %e, "tab navigation failed");
            }
        }

        if let Some(muted) = props.muted {
            contents.set_audio_muted(muted);
        }

        if let Some(pinned) = props.pinned {
            session.registry.set_pinned(id, pinned);
        }

        if props.active == Some(true) {
            self.activate(session, id);
        }

        let (_, current) = session.registry.refresh_tab(id)?;
        if let Some(before) = before {
            self.emit_changes(session, &before, &current);
        }
        Some(current)
    }

    pub fn reload(&self, session: &Session, id: TabId, props: &ReloadProperties) -> bool {
        let Some(contents) = session.registry.tab(id) else {
            return false;
        };
        contents.reload(props.bypass_cache.unwrap_or(false));
        true
    }

    /// Ask the embedder for a new tab and track it before returning, so the
    /// new id is queryable as soon as the caller sees it.
    pub async fn create(&self, session: &Session, props: &CreateProperties) -> Option<TabDetails> {
        let (contents, window_id) = match self.delegate.create_tab(session, props).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "tab creation failed");
                return None;
            }
        };

        let id = contents.id();
        self.observe(session, contents, window_id);

        if props.pinned == Some(true) {
            session.registry.set_pinned(id, true);
        }
        if props.active != Some(false) {
            self.activate(session, id);
        }

        session.registry.tab_details(id)
    }

    pub async fn insert_css(
        &self,
        session: &Session,
        extension: &Extension,
        id: TabId,
        details: &InjectDetails,
    ) -> bool {
        let Some(contents) = session.registry.tab(id) else {
            return false;
        };
        let Some(code) = injected_code(extension, details).await else {
            return false;
        };

        contents.insert_css(&code, details.css_origin.unwrap_or_default());
        true
    }

    /// Run a script in a tab. Resolves to the one-element result array
    /// extensions expect, or `None` when nothing ran.
    pub async fn execute_script(
        &self,
        session: &Session,
        extension: &Extension,
        id: TabId,
        details: &InjectDetails,
    ) -> Option<Value> {
        let contents = session.registry.tab(id)?;
        let code = injected_code(extension, details).await?;

        match contents.execute_javascript(&code).await {
            Ok(result) => Some(json!([result])),
            Err(e) => {
                tracing::warn!(tab_id = id, extension_id = %extension.id, error = %e, "script execution failed");
                None
            }
        }
    }

    /// Deliver a message to one tab of `session`. The tab answers through the
    /// `runtime.sendMessage` response relay under `response_id`. Tabs owned by
    /// another session are never reached.
    pub fn send_message(
        &self,
        session: &Session,
        id: TabId,
        sender: &MessageSender,
        message: Value,
        response_id: Option<&str>,
    ) -> bool {
        if !session.registry.has_tab(id) {
            tracing::debug!(tab_id = id, session_id = session.id(), "refusing message to a tab outside the session");
            return false;
        }

        let payload = json!({
            "message": message,
            "sender": sender,
            "responseId": response_id,
        });
        self.bus.send_to(id, TABS_SEND_MESSAGE, payload)
    }
}

/// Inline code, or the contents of a file under the extension directory.
async fn injected_code(extension: &Extension, details: &InjectDetails) -> Option<String> {
    if let Some(code) = &details.code {
        return Some(code.clone());
    }

    let file = details.file.as_deref()?;
    let relative = file.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        tracing::warn!(extension_id = %extension.id, file, "refusing to inject file outside the extension");
        return None;
    }

    let path = extension.path.join(relative);
    match tokio::fs::read_to_string(&path).await {
        Ok(code) => Some(code),
        Err(e) => {
            tracing::warn!(extension_id = %extension.id, path = %path.display(), error = %e, "injected file unreadable");
            None
        }
    }
}
