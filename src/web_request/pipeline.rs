//! Interception pipeline.
//!
//! Listeners are consulted in registration order. For stages that can
//! mutate, each matching listener is sent the request snapshot and awaited
//! (bounded by the listener timeout) before the next one is asked: the first
//! cancel ends the stage, otherwise mutations are layered field by field
//! with later listeners overwriting earlier ones. Observe-only stages are
//! delivered without waiting.
//!
//! A listener that is removed, destroyed, times out or answers garbage
//! counts as "no mutation"; the request always completes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};

use super::types::{
    BlockingResponse, CompiledFilter, Decision, InterceptOutcome, RequestDetails, RequestFilter,
    Stage,
};
use crate::contents::{is_alive, ContentsId, ContentsRef};
use crate::events::deliver;
use crate::ipc::channel::{intercepted_channel, SessionId};
use crate::ipc::correlator::{CorrelationId, Correlator};
use crate::sync::{lock, read, write};

pub struct ListenerRegistration {
    pub id: String,
    pub stage: Stage,
    pub session_id: SessionId,
    filter: CompiledFilter,
    contents: ContentsRef,
}

impl ListenerRegistration {
    pub fn contents_id(&self) -> ContentsId {
        self.contents.id()
    }
}

type ListenerKey = (ContentsId, String);

pub struct WebRequestPipeline {
    listeners: RwLock<Vec<Arc<ListenerRegistration>>>,
    correlator: Correlator,
    /// Correlation ids awaiting each listener's answer.
    in_flight: Mutex<HashMap<ListenerKey, HashSet<CorrelationId>>>,
    listener_timeout: Duration,
}

impl WebRequestPipeline {
    pub fn new(listener_timeout: Duration) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            correlator: Correlator::new(Some(listener_timeout)),
            in_flight: Mutex::new(HashMap::new()),
            listener_timeout,
        }
    }

    /// Register a listener. Re-registering the same id from the same
    /// handle replaces the earlier registration in place.
    pub fn add_listener(
        &self,
        session_id: SessionId,
        contents: ContentsRef,
        id: &str,
        stage: Stage,
        filter: &RequestFilter,
    ) {
        let registration = Arc::new(ListenerRegistration {
            id: id.to_string(),
            stage,
            session_id,
            filter: filter.compile(),
            contents,
        });

        let mut listeners = write(&self.listeners);
        let existing = listeners.iter().position(|listener| {
            listener.id == id && listener.contents_id() == registration.contents_id()
        });
        match existing {
            Some(index) => listeners[index] = registration,
            None => listeners.push(registration),
        }

        tracing::debug!(session_id, listener_id = id, %stage, "web request listener added");
    }

    /// Remove a listener. Answers it still owes resolve as "no mutation".
    pub fn remove_listener(&self, contents_id: ContentsId, id: &str) -> bool {
        let removed = {
            let mut listeners = write(&self.listeners);
            let before = listeners.len();
            listeners.retain(|listener| !(listener.id == id && listener.contents_id() == contents_id));
            listeners.len() != before
        };

        self.abandon(&(contents_id, id.to_string()));
        removed
    }

    /// Drop every listener owned by a handle.
    pub fn remove_listeners_for(&self, contents_id: ContentsId) -> usize {
        let removed: Vec<String> = {
            let mut listeners = write(&self.listeners);
            let (gone, kept): (Vec<_>, Vec<_>) = listeners
                .drain(..)
                .partition(|listener| listener.contents_id() == contents_id);
            *listeners = kept;
            gone.into_iter().map(|listener| listener.id.clone()).collect()
        };

        for id in &removed {
            self.abandon(&(contents_id, id.clone()));
        }
        removed.len()
    }

    pub fn listener_count(&self) -> usize {
        read(&self.listeners).len()
    }

    pub fn listener_timeout(&self) -> Duration {
        self.listener_timeout
    }

    /// Deliver a listener's answer. Returns `false` for ids this pipeline
    /// is not waiting on.
    pub fn resolve(&self, correlation_id: &str, answer: Value) -> bool {
        self.correlator.resolve(correlation_id, answer)
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.correlator.is_pending(correlation_id)
    }

    /// Run one stage for one request and return its effective outcome.
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        stage: Stage,
        details: &RequestDetails,
    ) -> InterceptOutcome {
        let matching: Vec<Arc<ListenerRegistration>> = read(&self.listeners)
            .iter()
            .filter(|listener| {
                listener.session_id == session_id
                    && listener.stage == stage
                    && listener.filter.matches(details)
            })
            .cloned()
            .collect();

        let mut outcome = InterceptOutcome::default();
        if matching.is_empty() {
            return outcome;
        }

        if !stage.can_mutate() {
            for listener in &matching {
                let channel = intercepted_channel(stage.as_str(), &listener.id);
                deliver(listener.contents.as_ref(), &channel, json!([details]));
            }
            return outcome;
        }

        for listener in matching {
            if !self.is_registered(&listener) || !is_alive(listener.contents.as_ref()) {
                continue;
            }

            for decision in self.consult(&listener, stage, details).await {
                if decision == Decision::Cancel {
                    tracing::debug!(
                        listener_id = %listener.id,
                        url = %details.url,
                        %stage,
                        "request cancelled by listener"
                    );
                    return InterceptOutcome {
                        cancel: true,
                        ..Default::default()
                    };
                }
                outcome.apply(decision, details);
            }
        }

        outcome
    }

    /// Ask one listener and wait for its answer.
    async fn consult(
        &self,
        listener: &ListenerRegistration,
        stage: Stage,
        details: &RequestDetails,
    ) -> Vec<Decision> {
        let key = (listener.contents_id(), listener.id.clone());
        let pending = self.correlator.register();
        let correlation_id = pending.id().to_string();
        lock(&self.in_flight)
            .entry(key.clone())
            .or_default()
            .insert(correlation_id.clone());

        let channel = intercepted_channel(stage.as_str(), &listener.id);
        let answer = if deliver(
            listener.contents.as_ref(),
            &channel,
            json!([details, correlation_id]),
        ) {
            pending.wait(Some(self.listener_timeout)).await
        } else {
            drop(pending);
            Ok(Value::Null)
        };

        if let Some(ids) = lock(&self.in_flight).get_mut(&key) {
            ids.remove(&correlation_id);
        }

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(listener_id = %listener.id, %stage, error = %e, "listener gave no answer");
                return vec![Decision::NoOp];
            }
        };

        if answer.is_null() {
            return vec![Decision::NoOp];
        }

        match serde_json::from_value::<BlockingResponse>(answer) {
            Ok(response) => Decision::from_response(stage, response),
            Err(e) => {
                tracing::warn!(listener_id = %listener.id, %stage, error = %e, "malformed listener answer");
                vec![Decision::NoOp]
            }
        }
    }

    fn is_registered(&self, listener: &Arc<ListenerRegistration>) -> bool {
        read(&self.listeners)
            .iter()
            .any(|registered| Arc::ptr_eq(registered, listener))
    }

    fn abandon(&self, key: &ListenerKey) {
        let ids = lock(&self.in_flight).remove(key).unwrap_or_default();
        for id in ids {
            self.correlator.discard(&id);
        }
    }
}
