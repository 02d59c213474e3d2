//! Request/response correlation across the process boundary.
//!
//! Every call that expects a reply gets a fresh correlation id and a
//! one-shot slot. The slot is removed from the table on first delivery, on
//! timeout, and when the waiting side drops its [`PendingReply`], so the
//! table never grows beyond the number of calls actually in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::sync::lock;

/// Opaque token pairing a request with its reply.
pub type CorrelationId = String;

/// Length of a generated correlation id (simple-form UUID v4).
pub const CORRELATION_ID_LEN: usize = 32;

type PendingTable = Mutex<HashMap<CorrelationId, oneshot::Sender<Value>>>;

/// Generate a fresh, unguessable correlation id.
pub fn new_correlation_id() -> CorrelationId {
    Uuid::new_v4().simple().to_string()
}

/// Whether `candidate` has the shape of a generated correlation id.
pub fn is_correlation_id(candidate: &str) -> bool {
    candidate.len() == CORRELATION_ID_LEN && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Table of in-flight requests awaiting exactly one reply each.
#[derive(Clone)]
pub struct Correlator {
    pending: Arc<PendingTable>,
    default_timeout: Option<Duration>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl Correlator {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Reserve a fresh correlation id and its reply slot.
    pub fn register(&self) -> PendingReply {
        let id = new_correlation_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        PendingReply {
            id,
            rx,
            table: Arc::downgrade(&self.pending),
        }
    }

    /// Deliver a reply. Returns `false` when the id is unknown or already
    /// consumed; such replies are dropped.
    pub fn resolve(&self, id: &str, value: Value) -> bool {
        let slot = lock(&self.pending).remove(id);
        match slot {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!(correlation_id = id, "dropping reply for unknown correlation id");
                false
            }
        }
    }

    /// Abandon a pending request; its waiter observes [`BridgeError::ReplyDropped`].
    pub fn discard(&self, id: &str) -> bool {
        lock(&self.pending).remove(id).is_some()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Register a slot, hand its id to `send`, then wait for the reply using
    /// the default timeout.
    pub async fn invoke<F>(&self, send: F) -> BridgeResult<Value>
    where
        F: FnOnce(&str) -> BridgeResult<()>,
    {
        let pending = self.register();
        send(pending.id())?;
        pending.wait(self.default_timeout).await
    }
}

/// The waiting half of a registered request.
///
/// Dropping it unregisters the slot, which is how callers that no longer
/// care about an answer give up without leaking.
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Value>,
    table: Weak<PendingTable>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply, optionally bounded by `timeout`.
    pub async fn wait(mut self, timeout: Option<Duration>) -> BridgeResult<Value> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => return Err(BridgeError::ReplyTimeout(self.id.clone())),
            },
            None => (&mut self.rx).await,
        };

        received.map_err(|_| BridgeError::ReplyDropped(self.id.clone()))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.id);
        }
    }
}
