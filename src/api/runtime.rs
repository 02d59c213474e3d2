//! `chrome.runtime` messaging and extension metadata.
//!
//! One-off messages go to the target extension's background page. When the
//! sender expects an answer it supplies a response id; the receiver answers
//! on `api-runtime-sendMessage-response-<id>` and the host relays that
//! answer, once, back to the original sender. An owed answer is dropped when
//! either side is destroyed or when it stays unanswered past the configured
//! bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::contents::{ContentsId, WebContents};
use crate::events::{deliver, EventBus};
use crate::extension::{Extension, ExtensionInfo};
use crate::ipc::channel::{reply_channel, RUNTIME_SEND_MESSAGE, RUNTIME_SEND_MESSAGE_RESPONSE};
use crate::ipc::correlator::CorrelationId;
use crate::ipc::types::MessageSender;
use crate::session::Session;
use crate::sync::lock;

struct OwedAnswer {
    waiter: ContentsId,
    receiver: ContentsId,
    expires_at: Instant,
}

pub struct RuntimeApi {
    bus: Arc<EventBus>,
    response_timeout: Duration,
    awaiting: Mutex<HashMap<CorrelationId, OwedAnswer>>,
}

impl RuntimeApi {
    pub fn new(bus: Arc<EventBus>, response_timeout: Duration) -> Self {
        Self {
            bus,
            response_timeout,
            awaiting: Mutex::new(HashMap::new()),
        }
    }

    /// Describe `caller` as a message sender of `extension_id`.
    pub fn sender_for(&self, session: &Session, caller: &dyn WebContents, extension_id: &str) -> MessageSender {
        MessageSender {
            id: extension_id.to_string(),
            url: caller.url(),
            frame_id: 0,
            tab: session.registry.tab_details(caller.id()),
            tls_channel_id: None,
        }
    }

    /// Forward a message to `extension`'s background page. Messages sent by
    /// the background page itself are not echoed back to it.
    pub fn send_message(
        &self,
        extension: &Extension,
        caller: ContentsId,
        sender: &MessageSender,
        message: Value,
        response_id: Option<&str>,
    ) -> bool {
        let Some(background) = extension.background_contents() else {
            tracing::debug!(extension_id = %extension.id, "message target has no background page");
            return false;
        };
        if background.id() == caller {
            return false;
        }

        if let Some(response_id) = response_id {
            self.expect_response(response_id, caller, background.id());
        }

        let payload = json!({
            "message": message,
            "sender": sender,
            "responseId": response_id,
        });
        let delivered = deliver(background.as_ref(), RUNTIME_SEND_MESSAGE, payload);
        if !delivered {
            if let Some(response_id) = response_id {
                lock(&self.awaiting).remove(response_id);
            }
        }
        delivered
    }

    /// Remember that `waiter` expects `receiver` to answer `response_id`.
    /// Expired entries are pruned on the way in.
    pub fn expect_response(&self, response_id: &str, waiter: ContentsId, receiver: ContentsId) {
        let now = Instant::now();
        let mut awaiting = lock(&self.awaiting);
        let before = awaiting.len();
        awaiting.retain(|_, owed| owed.expires_at > now);
        if awaiting.len() < before {
            tracing::debug!(expired = before - awaiting.len(), "dropped unanswered messages");
        }

        awaiting.insert(
            response_id.to_string(),
            OwedAnswer {
                waiter,
                receiver,
                expires_at: now + self.response_timeout,
            },
        );
    }

    pub fn is_awaiting(&self, response_id: &str) -> bool {
        lock(&self.awaiting)
            .get(response_id)
            .is_some_and(|owed| owed.expires_at > Instant::now())
    }

    pub fn awaiting_count(&self) -> usize {
        lock(&self.awaiting).len()
    }

    /// Relay an answer to whoever asked. Each response id is relayed at
    /// most once, and not after it expired.
    pub fn relay_response(&self, response_id: &str, answer: Value) -> bool {
        let owed = lock(&self.awaiting).remove(response_id);
        let Some(owed) = owed.filter(|owed| owed.expires_at > Instant::now()) else {
            tracing::debug!(response_id, "dropping answer nobody is waiting for");
            return false;
        };

        let channel = reply_channel(RUNTIME_SEND_MESSAGE_RESPONSE, response_id);
        self.bus.send_to(owed.waiter, &channel, answer)
    }

    /// Forget answers owed to, or owed by, a destroyed handle.
    pub fn forget_contents(&self, id: ContentsId) {
        lock(&self.awaiting).retain(|_, owed| owed.waiter != id && owed.receiver != id);
    }

    /// Reload the extension's background page.
    pub fn reload(&self, extension: &Extension) -> bool {
        match extension.background_contents() {
            Some(background) => {
                background.reload(false);
                tracing::info!(extension_id = %extension.id, "reloading background page");
                true
            }
            None => false,
        }
    }

    pub async fn extension_info(&self, session: &Session, id: &str) -> Option<ExtensionInfo> {
        let extension = session.extension(id)?;
        Some(extension.info().await)
    }

    pub async fn extensions_info(&self, session: &Session) -> Vec<ExtensionInfo> {
        let mut infos = Vec::new();
        for extension in session.extensions() {
            infos.push(extension.info().await);
        }
        infos
    }
}
