//! `chrome.windows`.

use std::sync::Arc;

use serde_json::json;

use crate::contents::{ContentsId, WindowEvent, WindowId, WindowRef, WINDOW_ID_NONE};
use crate::events::EventBus;
use crate::host::HostDelegate;
use crate::identity::{QueryInfo, WindowDetails};
use crate::ipc::types::{GetInfo, WindowCreateData};
use crate::session::Session;

pub struct WindowsApi {
    bus: Arc<EventBus>,
    delegate: Arc<dyn HostDelegate>,
}

impl WindowsApi {
    pub fn new(bus: Arc<EventBus>, delegate: Arc<dyn HostDelegate>) -> Self {
        Self { bus, delegate }
    }

    /// Track a native window and announce it with `windows.onCreated`.
    pub fn observe(&self, session: &Session, window: WindowRef) {
        let id = window.id();
        if session.registry.window(id).is_some() {
            return;
        }

        session.registry.observe_window(window);
        if let Some(details) = session.registry.window_details(id) {
            self.bus
                .broadcast_in_session(session.id(), "windows.onCreated", vec![json!(details)]);
        }
        tracing::debug!(session_id = session.id(), window_id = id, "window observed");
    }

    pub fn handle_event(&self, session: &Session, id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::Focus => {
                if session.registry.focused_window() == Some(id) {
                    return;
                }
                session.registry.set_focused_window(id);
                session.registry.invalidate_window(id);
                self.bus
                    .broadcast_in_session(session.id(), "windows.onFocusChanged", vec![json!(id)]);
            }
            WindowEvent::Blur => session.registry.invalidate_window(id),
            WindowEvent::Closed => {
                if session.registry.release_window(id) {
                    self.bus
                        .broadcast_in_session(session.id(), "windows.onRemoved", vec![json!(id)]);
                }
            }
        }
    }

    pub fn get(&self, session: &Session, id: WindowId, info: &GetInfo) -> Option<WindowDetails> {
        let details = session.registry.window_details(id)?;
        if !info.accepts(details.window_type) {
            return None;
        }
        Some(self.populate(session, details, info))
    }

    /// The window of the calling tab, or the last focused window for
    /// callers that are not tabs.
    pub fn get_current(&self, session: &Session, caller: ContentsId, info: &GetInfo) -> Option<WindowDetails> {
        let id = session
            .registry
            .window_of_tab(caller)
            .or_else(|| session.registry.window_for_contents(caller).map(|window| window.id()))
            .or_else(|| session.registry.focused_window())?;
        self.get(session, id, info)
    }

    pub fn get_last_focused(&self, session: &Session, info: &GetInfo) -> Option<WindowDetails> {
        let id = session.registry.focused_window()?;
        self.get(session, id, info)
    }

    pub fn get_all(&self, session: &Session, info: &GetInfo) -> Vec<WindowDetails> {
        session
            .registry
            .windows()
            .iter()
            .filter_map(|window| self.get(session, window.id(), info))
            .collect()
    }

    /// Ask the embedder for a new window and track it before returning.
    pub async fn create(&self, session: &Session, data: &WindowCreateData) -> Option<WindowDetails> {
        let window = match self.delegate.create_window(session, data).await {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "window creation failed");
                return None;
            }
        };

        let id = window.id();
        self.observe(session, window);
        if data.focused == Some(true) {
            session.registry.set_focused_window(id);
        }

        let info = GetInfo {
            populate: Some(true),
            window_types: None,
        };
        let details = session.registry.window_details(id)?;
        Some(self.populate(session, details, &info))
    }

    /// Id reported to extensions when no window has focus.
    pub fn focused_or_none(&self, session: &Session) -> WindowId {
        session.registry.focused_window().unwrap_or(WINDOW_ID_NONE)
    }

    fn populate(&self, session: &Session, mut details: WindowDetails, info: &GetInfo) -> WindowDetails {
        if info.populate() {
            let query = QueryInfo {
                window_id: Some(details.id),
                ..Default::default()
            };
            details.tabs = Some(session.registry.query_tabs(&query));
        }
        details
    }
}
