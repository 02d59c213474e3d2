//! Long-lived message ports (`runtime.connect`).
//!
//! A port is addressed only by its id. The host records which contexts take
//! part in it: the one that connected plus every context the connect
//! notification was delivered to. A message posted on the port goes to every
//! live participant except the poster. Disconnecting only removes the local
//! participant; the other end is not told. A context that disconnected can
//! no longer post on the port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::contents::ContentsId;
use crate::events::EventBus;
use crate::extension::Extension;
use crate::ipc::channel::{port_channel, SessionId, RUNTIME_CONNECT};
use crate::ipc::types::MessageSender;
use crate::session::Session;
use crate::sync::lock;

#[derive(Debug, Clone)]
struct PortEntry {
    name: Option<String>,
    participants: Vec<ContentsId>,
    departed: Vec<ContentsId>,
}

type PortKey = (SessionId, String);

pub struct PortManager {
    bus: Arc<EventBus>,
    ports: Mutex<HashMap<PortKey, PortEntry>>,
}

impl PortManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Open a port from `caller` to `target`'s background page, or to every
    /// other context of the session when the target has none.
    ///
    /// Returns `false` when the port id is already in use.
    pub fn connect(
        &self,
        session: &Session,
        target: Option<&Extension>,
        caller: ContentsId,
        port_id: &str,
        name: Option<&str>,
        sender: &MessageSender,
    ) -> bool {
        let key = (session.id(), port_id.to_string());
        if lock(&self.ports).contains_key(&key) {
            tracing::warn!(session_id = session.id(), port_id, "port id already in use");
            return false;
        }

        let payload = json!({"portId": port_id, "name": name, "sender": sender});
        let mut participants = vec![caller];

        match target.and_then(|extension| extension.background_contents()) {
            Some(background) if background.id() == caller => {}
            Some(background) => {
                if self.bus.send_to(background.id(), RUNTIME_CONNECT, payload) {
                    participants.push(background.id());
                }
            }
            None => {
                for contents in self.bus.session_contents(session.id()) {
                    let id = contents.id();
                    if id != caller && self.bus.send_to(id, RUNTIME_CONNECT, payload.clone()) {
                        participants.push(id);
                    }
                }
            }
        }

        tracing::debug!(
            session_id = session.id(),
            port_id,
            participants = participants.len(),
            "port connected"
        );

        lock(&self.ports).insert(
            key,
            PortEntry {
                name: name.map(str::to_string),
                participants,
                departed: Vec::new(),
            },
        );
        true
    }

    /// Deliver `message` to every participant except `caller`. A context
    /// posting on a port it was not known to hold joins it, unless it
    /// disconnected from that port earlier.
    pub fn post_message(&self, session_id: SessionId, caller: ContentsId, port_id: &str, message: Value) -> usize {
        let targets: Vec<ContentsId> = {
            let mut ports = lock(&self.ports);
            let Some(entry) = ports.get_mut(&(session_id, port_id.to_string())) else {
                tracing::debug!(session_id, port_id, "message for unknown port dropped");
                return 0;
            };
            if entry.departed.contains(&caller) {
                tracing::debug!(session_id, port_id, contents_id = caller, "message after disconnect dropped");
                return 0;
            }
            if !entry.participants.contains(&caller) {
                entry.participants.push(caller);
            }
            entry
                .participants
                .iter()
                .copied()
                .filter(|id| *id != caller)
                .collect()
        };

        let channel = port_channel(port_id);
        targets
            .into_iter()
            .filter(|id| self.bus.send_to(*id, &channel, message.clone()))
            .count()
    }

    /// Remove `caller` from a port. The port is dropped with its last
    /// participant.
    pub fn disconnect(&self, session_id: SessionId, caller: ContentsId, port_id: &str) -> bool {
        let mut ports = lock(&self.ports);
        let key = (session_id, port_id.to_string());
        let Some(entry) = ports.get_mut(&key) else {
            return false;
        };

        let before = entry.participants.len();
        entry.participants.retain(|id| *id != caller);
        let removed = entry.participants.len() != before;
        if removed {
            entry.departed.push(caller);
        }
        if entry.participants.is_empty() {
            ports.remove(&key);
        }
        removed
    }

    /// Drop a destroyed handle from every port it took part in.
    pub fn contents_destroyed(&self, id: ContentsId) {
        lock(&self.ports).retain(|_, entry| {
            entry.participants.retain(|participant| *participant != id);
            !entry.participants.is_empty()
        });
    }

    pub fn port_name(&self, session_id: SessionId, port_id: &str) -> Option<String> {
        lock(&self.ports)
            .get(&(session_id, port_id.to_string()))
            .and_then(|entry| entry.name.clone())
    }

    pub fn participants(&self, session_id: SessionId, port_id: &str) -> Vec<ContentsId> {
        lock(&self.ports)
            .get(&(session_id, port_id.to_string()))
            .map(|entry| entry.participants.clone())
            .unwrap_or_default()
    }

    pub fn port_count(&self) -> usize {
        lock(&self.ports).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::ContentsKind;
    use crate::extension::fixtures::write_extension;
    use crate::session::{SessionOptions, SessionRegistry};
    use crate::testing::FakeContents;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        session: Arc<Session>,
        extension: Arc<Extension>,
        bus: Arc<EventBus>,
        ports: PortManager,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(temp_dir.path().join("storage"), Vec::new());
        let session = registry.create(SessionOptions::new("p"));
        let dir = write_extension(temp_dir.path(), "ext", &json!({"name": "E"}));
        let (extension, _) = session.load_extension(&dir).await.unwrap();
        let bus = Arc::new(EventBus::new());

        Fixture {
            _temp_dir: temp_dir,
            session,
            extension,
            ports: PortManager::new(bus.clone()),
            bus,
        }
    }

    #[tokio::test]
    async fn test_connect_notifies_background_and_excludes_sender() {
        let fx = fixture().await;
        let background = FakeContents::new(1, ContentsKind::BackgroundPage, "bg");
        let page = FakeContents::new(2, ContentsKind::BrowserView, "p");
        fx.extension.set_background_contents(Some(background.clone()));
        fx.bus.add_listener_context(fx.session.id(), background.clone());
        fx.bus.attach(fx.session.id(), page.clone());

        let sender = MessageSender {
            id: "ext".into(),
            ..Default::default()
        };
        assert!(fx.ports.connect(&fx.session, Some(&fx.extension), 2, "p1", Some("chan"), &sender));
        assert!(!fx.ports.connect(&fx.session, Some(&fx.extension), 2, "p1", None, &sender));

        let connects = background.sent_on(RUNTIME_CONNECT);
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0]["portId"], "p1");
        assert_eq!(connects[0]["name"], "chan");
        assert_eq!(fx.ports.port_name(fx.session.id(), "p1").as_deref(), Some("chan"));

        assert_eq!(fx.ports.post_message(fx.session.id(), 2, "p1", json!("hi")), 1);
        assert_eq!(background.sent_on("api-port-postMessage-p1"), vec![json!("hi")]);
        assert!(page.sent_on("api-port-postMessage-p1").is_empty());

        assert_eq!(fx.ports.post_message(fx.session.id(), 1, "p1", json!("back")), 1);
        assert_eq!(page.sent_on("api-port-postMessage-p1"), vec![json!("back")]);
    }

    #[tokio::test]
    async fn test_without_background_page_all_other_contexts_are_notified() {
        let fx = fixture().await;
        let a = FakeContents::new(1, ContentsKind::BrowserView, "p");
        let b = FakeContents::new(2, ContentsKind::BrowserView, "p");
        let c = FakeContents::new(3, ContentsKind::BrowserView, "p");
        for contents in [&a, &b, &c] {
            fx.bus.attach(fx.session.id(), (*contents).clone());
        }

        let sender = MessageSender::default();
        assert!(fx.ports.connect(&fx.session, None, 1, "p2", None, &sender));
        assert!(a.sent_on(RUNTIME_CONNECT).is_empty());
        assert_eq!(b.sent_on(RUNTIME_CONNECT).len(), 1);
        assert_eq!(c.sent_on(RUNTIME_CONNECT).len(), 1);

        assert_eq!(fx.ports.post_message(fx.session.id(), 1, "p2", json!(5)), 2);
        assert!(a.sent_on("api-port-postMessage-p2").is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_and_destroyed_participants() {
        let fx = fixture().await;
        let a = FakeContents::new(1, ContentsKind::BrowserView, "p");
        let b = FakeContents::new(2, ContentsKind::BrowserView, "p");
        fx.bus.attach(fx.session.id(), a.clone());
        fx.bus.attach(fx.session.id(), b.clone());

        fx.ports
            .connect(&fx.session, None, 1, "p3", None, &MessageSender::default());
        assert_eq!(fx.ports.participants(fx.session.id(), "p3"), vec![1, 2]);

        b.destroy();
        assert_eq!(fx.ports.post_message(fx.session.id(), 1, "p3", json!(1)), 0);

        fx.ports.contents_destroyed(2);
        assert_eq!(fx.ports.participants(fx.session.id(), "p3"), vec![1]);

        assert!(fx.ports.disconnect(fx.session.id(), 1, "p3"));
        assert_eq!(fx.ports.port_count(), 0);
        assert_eq!(fx.ports.post_message(fx.session.id(), 1, "p3", json!(1)), 0);
    }

    #[tokio::test]
    async fn test_post_after_disconnect_is_dropped() {
        let fx = fixture().await;
        let a = FakeContents::new(1, ContentsKind::BrowserView, "p");
        let b = FakeContents::new(2, ContentsKind::BrowserView, "p");
        fx.bus.attach(fx.session.id(), a.clone());
        fx.bus.attach(fx.session.id(), b.clone());

        fx.ports
            .connect(&fx.session, None, 1, "p4", None, &MessageSender::default());
        assert!(fx.ports.disconnect(fx.session.id(), 1, "p4"));
        assert!(!fx.ports.disconnect(fx.session.id(), 1, "p4"));

        assert_eq!(fx.ports.post_message(fx.session.id(), 1, "p4", json!("late")), 0);
        assert_eq!(fx.ports.participants(fx.session.id(), "p4"), vec![2]);
        assert!(b.sent_on("api-port-postMessage-p4").is_empty());

        let c = FakeContents::new(3, ContentsKind::BrowserView, "p");
        fx.bus.attach(fx.session.id(), c.clone());
        assert_eq!(fx.ports.post_message(fx.session.id(), 3, "p4", json!("join")), 1);
        assert_eq!(fx.ports.participants(fx.session.id(), "p4"), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_ports_are_session_scoped() {
        let fx = fixture().await;
        fx.ports
            .connect(&fx.session, None, 1, "shared", None, &MessageSender::default());
        assert_eq!(fx.ports.post_message(fx.session.id() + 1, 1, "shared", json!(1)), 0);
        assert!(fx.ports.participants(fx.session.id() + 1, "shared").is_empty());
    }
}
