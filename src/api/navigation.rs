//! `chrome.webNavigation` events derived from tab lifecycle notifications.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::contents::{ContentsEvent, WebContents};
use crate::events::EventBus;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    pub tab_id: i64,
    pub url: String,
    pub frame_id: i64,
    pub parent_frame_id: i64,
    pub process_id: i64,
    pub time_stamp: f64,
}

pub struct WebNavigationApi {
    bus: Arc<EventBus>,
}

impl WebNavigationApi {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// The `webNavigation` event a lifecycle notification maps to, if any.
    pub fn event_for(event: &ContentsEvent) -> Option<(&'static str, &str)> {
        match event {
            ContentsEvent::WillNavigate { url } => Some(("webNavigation.onBeforeNavigate", url.as_str())),
            ContentsEvent::NavigationStarted { url, main_frame: true } => {
                Some(("webNavigation.onCommitted", url.as_str()))
            }
            ContentsEvent::NavigationCommitted { url } => Some(("webNavigation.onCompleted", url.as_str())),
            _ => None,
        }
    }

    pub fn handle_event(&self, session: &Session, contents: &dyn WebContents, event: &ContentsEvent) -> bool {
        let Some((name, url)) = Self::event_for(event) else {
            return false;
        };

        let details = NavigationDetails {
            tab_id: contents.id(),
            url: url.to_string(),
            frame_id: 0,
            parent_frame_id: -1,
            process_id: contents.process_id(),
            time_stamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as f64)
                .unwrap_or(0.0),
        };

        self.bus
            .broadcast_in_session(session.id(), name, vec![json!(details)]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::ContentsKind;
    use crate::session::{SessionOptions, SessionRegistry};
    use crate::testing::FakeContents;
    use tempfile::TempDir;

    #[test]
    fn test_navigation_events() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(temp_dir.path().to_path_buf(), Vec::new());
        let session = registry.create(SessionOptions::new("p"));
        let bus = Arc::new(EventBus::new());
        let background = FakeContents::new(1, ContentsKind::BackgroundPage, "bg");
        bus.add_listener_context(session.id(), background.clone());
        let api = WebNavigationApi::new(bus);

        let tab = FakeContents::new(5, ContentsKind::BrowserView, "p");
        let url = "https://example.com/".to_string();

        assert!(api.handle_event(&session, tab.as_ref(), &ContentsEvent::WillNavigate { url: url.clone() }));
        assert!(!api.handle_event(
            &session,
            tab.as_ref(),
            &ContentsEvent::NavigationStarted {
                url: url.clone(),
                main_frame: false
            }
        ));
        assert!(api.handle_event(
            &session,
            tab.as_ref(),
            &ContentsEvent::NavigationStarted {
                url: url.clone(),
                main_frame: true
            }
        ));
        assert!(api.handle_event(&session, tab.as_ref(), &ContentsEvent::NavigationCommitted { url }));
        assert!(!api.handle_event(&session, tab.as_ref(), &ContentsEvent::LoadStop));

        let before = background.sent_on("api-emit-event-webNavigation-onBeforeNavigate");
        assert_eq!(before[0][0]["tabId"], 5);
        assert_eq!(before[0][0]["parentFrameId"], -1);
        assert_eq!(
            background.sent_on("api-emit-event-webNavigation-onCommitted").len(),
            1
        );
        assert_eq!(
            background.sent_on("api-emit-event-webNavigation-onCompleted").len(),
            1
        );
    }
}
