//! Event fanout.
//!
//! The bus owns the directory of every content handle the host has attached,
//! tagged with the session it belongs to, plus the subset registered as
//! extension listener contexts (background pages). Fanout snapshots its
//! targets under the lock and delivers after releasing it; each delivery is
//! preceded by a liveness check and isolated from the others, so a dead or
//! misbehaving receiver only loses its own copy.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::RwLock;

use serde_json::Value;

use crate::contents::{is_alive, ContentsId, ContentsRef, TabId, WebContents};
use crate::ipc::channel::{event_channel, SessionId};
use crate::sync::{read, write};

struct Attached {
    session_id: SessionId,
    contents: ContentsRef,
}

#[derive(Default)]
pub struct EventBus {
    directory: RwLock<HashMap<ContentsId, Attached>>,
    /// Extension listener contexts, in registration order.
    listeners: RwLock<Vec<(SessionId, ContentsId)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Directory ──────────────────────────────────────────────────────────

    pub fn attach(&self, session_id: SessionId, contents: ContentsRef) {
        let id = contents.id();
        write(&self.directory).insert(id, Attached { session_id, contents });
    }

    /// Forget a handle entirely. Returns it if it was attached.
    pub fn detach(&self, id: ContentsId) -> Option<ContentsRef> {
        write(&self.listeners).retain(|(_, listener)| *listener != id);
        write(&self.directory).remove(&id).map(|entry| entry.contents)
    }

    pub fn contents(&self, id: ContentsId) -> Option<ContentsRef> {
        read(&self.directory).get(&id).map(|entry| entry.contents.clone())
    }

    pub fn session_of(&self, id: ContentsId) -> Option<SessionId> {
        read(&self.directory).get(&id).map(|entry| entry.session_id)
    }

    /// Every attached handle of a session.
    pub fn session_contents(&self, session_id: SessionId) -> Vec<ContentsRef> {
        read(&self.directory)
            .values()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.contents.clone())
            .collect()
    }

    // ─── Listener contexts ──────────────────────────────────────────────────

    /// Attach `contents` and register it to receive extension broadcasts.
    pub fn add_listener_context(&self, session_id: SessionId, contents: ContentsRef) {
        let id = contents.id();
        self.attach(session_id, contents);

        let mut listeners = write(&self.listeners);
        if !listeners.iter().any(|(_, listener)| *listener == id) {
            listeners.push((session_id, id));
        }
    }

    pub fn remove_listener_context(&self, id: ContentsId) -> bool {
        let mut listeners = write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(_, listener)| *listener != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        read(&self.listeners).len()
    }

    // ─── Delivery ───────────────────────────────────────────────────────────

    /// Deliver `event` to every extension listener context of every session.
    pub fn broadcast_to_extensions(&self, event: &str, args: Vec<Value>) -> usize {
        let targets = self.listener_targets(|_| true);
        self.fanout(&targets, &event_channel(event), Value::Array(args))
    }

    /// Deliver `event` to the extension listener contexts of one session.
    pub fn broadcast_in_session(&self, session_id: SessionId, event: &str, args: Vec<Value>) -> usize {
        let targets = self.listener_targets(|sid| sid == session_id);
        self.fanout(&targets, &event_channel(event), Value::Array(args))
    }

    /// Send a raw message to every attached handle of a session (listener
    /// contexts and pages alike), optionally skipping one.
    pub fn send_to_session(
        &self,
        session_id: SessionId,
        channel: &str,
        payload: Value,
        except: Option<ContentsId>,
    ) -> usize {
        let targets: Vec<ContentsRef> = self
            .session_contents(session_id)
            .into_iter()
            .filter(|contents| Some(contents.id()) != except)
            .collect();
        self.fanout(&targets, channel, payload)
    }

    /// Deliver `event` to a single handle. Dead or unknown handles are
    /// silently skipped.
    pub fn emit_to(&self, id: ContentsId, event: &str, args: Vec<Value>) -> bool {
        self.send_to(id, &event_channel(event), Value::Array(args))
    }

    pub fn emit_to_tab(&self, tab_id: TabId, event: &str, args: Vec<Value>) -> bool {
        self.emit_to(tab_id, event, args)
    }

    pub fn send_to(&self, id: ContentsId, channel: &str, payload: Value) -> bool {
        let Some(contents) = self.contents(id) else {
            tracing::debug!(contents_id = id, channel, "dropping message for unknown contents");
            return false;
        };

        let delivered = deliver(contents.as_ref(), channel, payload);
        if !delivered && !is_alive(contents.as_ref()) {
            self.detach(id);
        }
        delivered
    }

    fn listener_targets(&self, include: impl Fn(SessionId) -> bool) -> Vec<ContentsRef> {
        let listeners = read(&self.listeners);
        let directory = read(&self.directory);

        listeners
            .iter()
            .filter(|(session_id, _)| include(*session_id))
            .filter_map(|(_, id)| directory.get(id).map(|entry| entry.contents.clone()))
            .collect()
    }

    fn fanout(&self, targets: &[ContentsRef], channel: &str, payload: Value) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for contents in targets {
            if deliver(contents.as_ref(), channel, payload.clone()) {
                delivered += 1;
            } else if !is_alive(contents.as_ref()) {
                dead.push(contents.id());
            }
        }

        for id in dead {
            self.detach(id);
        }
        delivered
    }
}

/// Send one message to one handle, checking liveness first. Send errors and
/// panics inside the receiver are logged and reported as non-delivery.
pub(crate) fn deliver(contents: &dyn WebContents, channel: &str, payload: Value) -> bool {
    if !is_alive(contents) {
        tracing::debug!(contents_id = contents.id(), channel, "skipping destroyed contents");
        return false;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| contents.send(channel, payload))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(contents_id = contents.id(), channel, error = %e, "delivery failed");
            false
        }
        Err(_) => {
            tracing::error!(contents_id = contents.id(), channel, "receiver panicked during delivery");
            false
        }
    }
}
