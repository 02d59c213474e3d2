//! Renderer-side half of the bridge.
//!
//! An [`ExtensionClient`] lives in one extension context (background page,
//! popup or content script). It frames requests onto session channels,
//! pairs replies with their callers, and turns host pushes (events, port
//! traffic, messages, interceptions) into typed values on `mpsc` queues.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::channel::{
    api_channel, api_prefix, event_name, intercept_response_prefix, reply_channel, Route,
    SessionId, BADGE_TEXT_BROADCAST, EMIT_EVENT_PREFIX, PORT_MESSAGE_PREFIX, RUNTIME_CONNECT,
    RUNTIME_SEND_MESSAGE, RUNTIME_SEND_MESSAGE_RESPONSE, TABS_SEND_MESSAGE,
    WEB_REQUEST_INTERCEPTED_PREFIX,
};
use super::correlator::{new_correlation_id, Correlator};
use super::message::{ApiRequest, RequestEnvelope};
use super::types::{AlarmCreateInfo, BadgeTextDetails, CreateProperties, MessageSender, StorageOperation};
use crate::contents::TabId;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::{QueryInfo, TabDetails};
use crate::storage::StorageAreaName;
use crate::sync::lock;
use crate::web_request::{BlockingResponse, RequestDetails, RequestFilter, Stage};

/// Outbound half of the renderer's IPC pipe.
pub trait Transport: Send + Sync {
    fn send(&self, channel: &str, payload: Value) -> BridgeResult<()>;
}

/// A one-off message addressed to this context.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub message: Value,
    pub sender: MessageSender,
    /// Set when the sender waits for an answer; pass it to
    /// [`ExtensionClient::respond`].
    pub response_id: Option<String>,
}

/// A badge update another context wants acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeUpdate {
    pub correlation_id: String,
    pub extension_id: String,
    pub details: BadgeTextDetails,
}

type InterceptHandler = Arc<dyn Fn(&RequestDetails) -> Option<BlockingResponse> + Send + Sync>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFrame {
    #[serde(default)]
    message: Value,
    #[serde(default)]
    sender: MessageSender,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectFrame {
    port_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sender: MessageSender,
}

#[derive(Default)]
struct Inboxes {
    events: HashMap<String, Vec<mpsc::UnboundedSender<Vec<Value>>>>,
    ports: HashMap<String, mpsc::UnboundedSender<Value>>,
    messages: Option<mpsc::UnboundedSender<IncomingMessage>>,
    connections: Option<mpsc::UnboundedSender<Port>>,
    badges: Option<mpsc::UnboundedSender<BadgeUpdate>>,
    interceptors: HashMap<String, InterceptHandler>,
}

pub struct ExtensionClient {
    transport: Arc<dyn Transport>,
    session_id: SessionId,
    extension_id: Option<String>,
    correlator: Correlator,
    inboxes: Mutex<Inboxes>,
}

impl std::fmt::Debug for ExtensionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionClient")
            .field("session_id", &self.session_id)
            .field("extension_id", &self.extension_id)
            .field("correlator", &self.correlator)
            .finish()
    }
}

impl ExtensionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session_id: SessionId,
        extension_id: Option<String>,
        reply_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            session_id,
            extension_id,
            correlator: Correlator::new(reply_timeout),
            inboxes: Mutex::new(Inboxes::default()),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Send `request` and wait for the host's reply.
    pub async fn call(&self, request: ApiRequest) -> BridgeResult<Value> {
        let (domain, operation) = request.route();
        let channel = api_channel(domain, operation, self.session_id);
        let extension_id = self.extension_id.clone();

        self.correlator
            .invoke(|response_id| {
                let envelope = RequestEnvelope {
                    response_id: Some(response_id.to_string()),
                    extension_id,
                    request,
                };
                self.transport.send(&channel, serde_json::to_value(&envelope)?)
            })
            .await
    }

    /// Send `request` without asking for a reply.
    pub fn notify(&self, request: ApiRequest) -> BridgeResult<()> {
        let (domain, operation) = request.route();
        let envelope = RequestEnvelope {
            response_id: None,
            extension_id: self.extension_id.clone(),
            request,
        };
        self.transport.send(
            &api_channel(domain, operation, self.session_id),
            serde_json::to_value(&envelope)?,
        )
    }

    async fn call_as<T: DeserializeOwned>(&self, request: ApiRequest) -> BridgeResult<T> {
        let (domain, operation) = request.route();
        let value = self.call(request).await?;
        serde_json::from_value(value).map_err(|e| BridgeError::MalformedPayload {
            channel: api_prefix(domain, operation),
            message: e.to_string(),
        })
    }

    pub async fn tabs_get(&self, tab_id: TabId) -> BridgeResult<Option<TabDetails>> {
        self.call_as(ApiRequest::TabsGet { tab_id }).await
    }

    pub async fn tabs_query(&self, query: QueryInfo) -> BridgeResult<Vec<TabDetails>> {
        self.call_as(ApiRequest::TabsQuery { query }).await
    }

    pub async fn tabs_create(&self, props: CreateProperties) -> BridgeResult<Option<TabDetails>> {
        self.call_as(ApiRequest::TabsCreate { props }).await
    }

    pub async fn storage(&self, area: StorageAreaName, operation: StorageOperation) -> BridgeResult<Value> {
        self.call(ApiRequest::Storage { area, operation }).await
    }

    pub fn create_alarm(&self, name: &str, info: AlarmCreateInfo) -> BridgeResult<()> {
        self.notify(ApiRequest::AlarmsCreate {
            name: name.to_string(),
            info,
        })
    }

    /// `runtime.sendMessage`. Resolves with the receiver's answer, or `null`
    /// when nobody could receive the message.
    pub async fn send_message(&self, extension_id: Option<&str>, message: Value) -> BridgeResult<Value> {
        let pending = self.correlator.register();
        self.notify(ApiRequest::RuntimeSendMessage {
            extension_id: extension_id.map(str::to_string),
            message,
            response_id: Some(pending.id().to_string()),
        })?;
        pending.wait(self.correlator.default_timeout()).await
    }

    /// Answer an [`IncomingMessage`].
    pub fn respond(&self, response_id: &str, answer: Value) -> BridgeResult<()> {
        self.transport
            .send(&reply_channel(RUNTIME_SEND_MESSAGE_RESPONSE, response_id), answer)
    }

    /// `runtime.connect`. The port is usable whether or not anyone was
    /// listening on the other side.
    pub async fn connect(self: &Arc<Self>, extension_id: Option<&str>, name: Option<&str>) -> BridgeResult<Port> {
        let port_id = new_correlation_id();
        let port = self.open_port(&port_id, name.map(str::to_string), MessageSender::default());

        let accepted = self
            .call(ApiRequest::RuntimeConnect {
                port_id,
                extension_id: extension_id.map(str::to_string),
                name: name.map(str::to_string),
            })
            .await?;
        if accepted == Value::Bool(false) {
            tracing::warn!(port_id = %port.id, "host refused port");
        }
        Ok(port)
    }

    /// Register a blocking web-request listener. `handler` answers `None`
    /// for "no change".
    pub fn add_web_request_listener(
        &self,
        stage: Stage,
        filter: RequestFilter,
        handler: impl Fn(&RequestDetails) -> Option<BlockingResponse> + Send + Sync + 'static,
    ) -> BridgeResult<String> {
        let listener_id = new_correlation_id();
        lock(&self.inboxes)
            .interceptors
            .insert(listener_id.clone(), Arc::new(handler));

        let registered = self.notify(ApiRequest::WebRequestAddListener {
            listener_id: listener_id.clone(),
            event: stage,
            filter,
        });
        if let Err(e) = registered {
            lock(&self.inboxes).interceptors.remove(&listener_id);
            return Err(e);
        }
        Ok(listener_id)
    }

    pub fn remove_web_request_listener(&self, listener_id: &str) -> BridgeResult<()> {
        lock(&self.inboxes).interceptors.remove(listener_id);
        self.notify(ApiRequest::WebRequestRemoveListener {
            listener_id: listener_id.to_string(),
        })
    }

    /// Receive every delivery of `event` (`tabs.onUpdated`) as its argument list.
    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Vec<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes)
            .events
            .entry(event.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Messages from `runtime.sendMessage` and `tabs.sendMessage`. Taking
    /// the queue again replaces the previous one.
    pub fn messages(&self) -> mpsc::UnboundedReceiver<IncomingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes).messages = Some(tx);
        rx
    }

    /// Ports opened towards this context.
    pub fn connections(&self) -> mpsc::UnboundedReceiver<Port> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes).connections = Some(tx);
        rx
    }

    pub fn badge_updates(&self) -> mpsc::UnboundedReceiver<BadgeUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes).badges = Some(tx);
        rx
    }

    pub fn acknowledge_badge(&self, correlation_id: &str) -> BridgeResult<()> {
        self.transport
            .send(&reply_channel(BADGE_TEXT_BROADCAST, correlation_id), Value::Null)
    }

    /// Feed one message received from the host. Returns whether anything
    /// consumed it.
    pub fn deliver(self: &Arc<Self>, channel: &str, payload: Value) -> bool {
        if let Some(port_id) = channel.strip_prefix(PORT_MESSAGE_PREFIX) {
            return self.deliver_port_message(port_id, payload);
        }
        if let Some(rest) = channel.strip_prefix(WEB_REQUEST_INTERCEPTED_PREFIX) {
            return self.intercept(rest, payload);
        }
        if channel.starts_with(EMIT_EVENT_PREFIX) {
            return self.deliver_event(channel, payload);
        }
        if channel == RUNTIME_CONNECT {
            return self.accept_connection(payload);
        }
        if channel == RUNTIME_SEND_MESSAGE || channel == TABS_SEND_MESSAGE {
            return self.deliver_message(channel, payload);
        }
        if channel == BADGE_TEXT_BROADCAST {
            return self.deliver_badge(payload);
        }

        match super::channel::parse(channel) {
            Some(Route::Reply { correlation_id, .. }) => self.correlator.resolve(correlation_id, payload),
            _ => {
                tracing::debug!(channel, "ignoring unexpected host message");
                false
            }
        }
    }

    fn deliver_event(&self, channel: &str, payload: Value) -> bool {
        let Some(event) = event_name(channel) else {
            return false;
        };
        let args = match payload {
            Value::Array(args) => args,
            other => vec![other],
        };

        let mut inboxes = lock(&self.inboxes);
        let Some(subscribers) = inboxes.events.get_mut(&event) else {
            return false;
        };
        subscribers.retain(|tx| tx.send(args.clone()).is_ok());
        !subscribers.is_empty()
    }

    fn deliver_message(&self, channel: &str, payload: Value) -> bool {
        let frame: MessageFrame = match serde_json::from_value(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel, error = %e, "malformed message frame");
                return false;
            }
        };

        let inboxes = lock(&self.inboxes);
        inboxes.messages.as_ref().is_some_and(|tx| {
            tx.send(IncomingMessage {
                message: frame.message,
                sender: frame.sender,
                response_id: frame.response_id,
            })
            .is_ok()
        })
    }

    fn deliver_badge(&self, payload: Value) -> bool {
        let parsed: Result<(String, String, BadgeTextDetails), _> = serde_json::from_value(payload);
        let Ok((correlation_id, extension_id, details)) = parsed else {
            tracing::warn!("malformed badge update");
            return false;
        };

        let inboxes = lock(&self.inboxes);
        inboxes.badges.as_ref().is_some_and(|tx| {
            tx.send(BadgeUpdate {
                correlation_id,
                extension_id,
                details,
            })
            .is_ok()
        })
    }

    fn accept_connection(self: &Arc<Self>, payload: Value) -> bool {
        let frame: ConnectFrame = match serde_json::from_value(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "malformed connect frame");
                return false;
            }
        };

        let Some(connections) = lock(&self.inboxes).connections.clone() else {
            return false;
        };
        let port = self.open_port(&frame.port_id, frame.name, frame.sender);
        connections.send(port).is_ok()
    }

    fn deliver_port_message(&self, port_id: &str, message: Value) -> bool {
        let mut inboxes = lock(&self.inboxes);
        let Some(tx) = inboxes.ports.get(port_id) else {
            return false;
        };
        if tx.send(message).is_ok() {
            return true;
        }
        inboxes.ports.remove(port_id);
        false
    }

    /// `rest` is `<stage>-<listenerId>`; the payload is `[details]` or
    /// `[details, correlationId]` when the host waits for an answer.
    fn intercept(&self, rest: &str, payload: Value) -> bool {
        let Some((stage, listener_id)) = rest.split_once('-') else {
            return false;
        };
        let Some(handler) = lock(&self.inboxes).interceptors.get(listener_id).cloned() else {
            tracing::debug!(listener_id, "interception for unknown listener");
            return false;
        };

        let parsed: Result<(RequestDetails, Option<String>), _> = match payload {
            Value::Array(mut items) if items.len() == 1 => {
                serde_json::from_value(items.remove(0)).map(|details| (details, None))
            }
            other => serde_json::from_value(other),
        };
        let (details, correlation_id) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(listener_id, error = %e, "malformed interception");
                return false;
            }
        };

        // A panicking handler counts as a no-op answer.
        let answer = panic::catch_unwind(AssertUnwindSafe(|| handler(&details))).unwrap_or_else(|_| {
            tracing::error!(listener_id, url = %details.url, "interception handler panicked");
            None
        });
        let Some(correlation_id) = correlation_id else {
            return true;
        };

        let channel = reply_channel(&intercept_response_prefix(stage, listener_id), &correlation_id);
        let answer = answer.map_or(Value::Null, |response| json!(response));
        match self.transport.send(&channel, answer) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(listener_id, error = %e, "could not answer interception");
                false
            }
        }
    }

    fn open_port(self: &Arc<Self>, port_id: &str, name: Option<String>, sender: MessageSender) -> Port {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes).ports.insert(port_id.to_string(), tx);
        Port {
            id: port_id.to_string(),
            name,
            sender,
            client: Arc::clone(self),
            rx,
            disconnected: AtomicBool::new(false),
        }
    }
}

/// One end of a `runtime.connect` channel.
pub struct Port {
    pub id: String,
    pub name: Option<String>,
    /// Who opened the port; empty for ports this context opened.
    pub sender: MessageSender,
    client: Arc<ExtensionClient>,
    rx: mpsc::UnboundedReceiver<Value>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl Port {
    /// Posting on a disconnected port does nothing.
    pub fn post_message(&self, message: Value) -> BridgeResult<()> {
        if self.is_disconnected() {
            tracing::debug!(port_id = %self.id, "post on disconnected port ignored");
            return Ok(());
        }
        self.client.notify(ApiRequest::PortPostMessage {
            port_id: self.id.clone(),
            message,
        })
    }

    /// Next message, or `None` once disconnected.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.is_disconnected() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn disconnect(&self) -> BridgeResult<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.client.inboxes).ports.remove(&self.id);
        self.client.notify(ApiRequest::PortDisconnect {
            port_id: self.id.clone(),
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::debug!(port_id = %self.id, error = %e, "could not announce dropped port");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::extension::fixtures::write_extension;
    use crate::host::ExtensionsHost;
    use crate::contents::ContentsRef;
    use crate::ipc::channel::port_channel;
    use crate::session::SessionOptions;
    use crate::testing::{FakeContents, FakeDelegate};
    use tempfile::TempDir;

    struct QueueTransport {
        tx: mpsc::UnboundedSender<(String, Value)>,
    }

    impl Transport for QueueTransport {
        fn send(&self, channel: &str, payload: Value) -> BridgeResult<()> {
            self.tx
                .send((channel.to_string(), payload))
                .map_err(|_| BridgeError::Transport("closed".to_string()))
        }
    }

    fn client() -> (Arc<ExtensionClient>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ExtensionClient::new(Arc::new(QueueTransport { tx }), 3, Some("ext".into()), None);
        (client, rx)
    }

    #[tokio::test]
    async fn test_call_is_framed_and_resolved_by_reply() {
        let (client, mut outbox) = client();
        let caller = Arc::clone(&client);
        let call = tokio::spawn(async move { caller.tabs_query(QueryInfo::default()).await });

        let (channel, payload) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-tabs-query-3");
        assert_eq!(payload["request"]["op"], "tabs.query");
        assert_eq!(payload["extensionId"], "ext");
        let response_id = payload["responseId"].as_str().unwrap().to_string();

        let reply = reply_channel(&api_prefix("tabs", "query"), &response_id);
        assert!(client.deliver(&reply, json!([])));
        assert!(call.await.unwrap().unwrap().is_empty());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_event_subscribers_receive_argument_lists() {
        let (client, _outbox) = client();
        let mut created = client.subscribe("tabs.onCreated");
        assert!(!client.deliver("api-emit-event-tabs-onRemoved", json!([1])));

        assert!(client.deliver("api-emit-event-tabs-onCreated", json!([{"id": 4}])));
        assert_eq!(created.recv().await.unwrap(), vec![json!({"id": 4})]);

        drop(created);
        assert!(!client.deliver("api-emit-event-tabs-onCreated", json!([{"id": 5}])));
    }

    #[tokio::test]
    async fn test_incoming_message_and_response() {
        let (client, mut outbox) = client();
        let mut messages = client.messages();

        let frame = json!({"message": "ping", "sender": {"id": "other", "url": "", "frameId": 0}, "responseId": "r1"});
        assert!(client.deliver(RUNTIME_SEND_MESSAGE, frame));

        let incoming = messages.recv().await.unwrap();
        assert_eq!(incoming.message, json!("ping"));
        assert_eq!(incoming.sender.id, "other");
        client.respond(incoming.response_id.as_deref().unwrap(), json!("pong")).unwrap();

        let (channel, payload) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-runtime-sendMessage-response-r1");
        assert_eq!(payload, json!("pong"));
    }

    #[tokio::test]
    async fn test_accepted_port_receives_and_disconnects() {
        let (client, mut outbox) = client();
        let mut connections = client.connections();

        assert!(client.deliver(RUNTIME_CONNECT, json!({"portId": "p1", "name": "chan"})));
        let mut port = connections.recv().await.unwrap();
        assert_eq!(port.name.as_deref(), Some("chan"));

        assert!(client.deliver(&port_channel("p1"), json!({"n": 1})));
        assert_eq!(port.recv().await, Some(json!({"n": 1})));

        port.post_message(json!("reply")).unwrap();
        let (channel, payload) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-port-postMessage-3");
        assert_eq!(payload["request"]["args"], json!({"portId": "p1", "message": "reply"}));

        port.disconnect().unwrap();
        let (channel, _) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-port-disconnect-3");
        assert!(!client.deliver(&port_channel("p1"), json!(2)));
        port.post_message(json!(3)).unwrap();
        assert!(outbox.try_recv().is_err());
        assert_eq!(port.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_port_disconnects() {
        let (client, mut outbox) = client();
        let mut connections = client.connections();

        assert!(client.deliver(RUNTIME_CONNECT, json!({"portId": "p2"})));
        let port = connections.recv().await.unwrap();
        assert!(lock(&client.inboxes).ports.contains_key("p2"));

        drop(port);
        let (channel, payload) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-port-disconnect-3");
        assert_eq!(payload["request"]["args"]["portId"], "p2");
        assert!(!lock(&client.inboxes).ports.contains_key("p2"));
        assert!(!client.deliver(&port_channel("p2"), json!(1)));
    }

    #[tokio::test]
    async fn test_interception_is_answered_on_listener_reply_channel() {
        let (client, mut outbox) = client();
        let listener_id = client
            .add_web_request_listener(Stage::OnBeforeRequest, RequestFilter::default(), |details| {
                details.url.contains("ads").then(BlockingResponse::cancel)
            })
            .unwrap();
        let (channel, registration) = outbox.recv().await.unwrap();
        assert_eq!(channel, "api-webRequest-addListener-3");
        assert_eq!(registration["request"]["args"]["listenerId"], listener_id.as_str());

        let details = RequestDetails {
            url: "https://ads.example/x.js".into(),
            ..Default::default()
        };
        let intercepted = format!("{WEB_REQUEST_INTERCEPTED_PREFIX}onBeforeRequest-{listener_id}");
        let cid = new_correlation_id();
        assert!(client.deliver(&intercepted, json!([details, cid])));

        let (channel, answer) = outbox.recv().await.unwrap();
        assert_eq!(channel, format!("api-webRequest-response-onBeforeRequest-{listener_id}-{cid}"));
        assert_eq!(answer, json!({"cancel": true}));

        // observational stages expect no answer
        assert!(client.deliver(&intercepted, json!([details])));
        assert!(outbox.try_recv().is_err());

        client.remove_web_request_listener(&listener_id).unwrap();
        assert!(!client.deliver(&intercepted, json!([details, new_correlation_id()])));
    }

    #[tokio::test]
    async fn test_panicking_interception_handler_answers_null() {
        let (client, mut outbox) = client();
        let listener_id = client
            .add_web_request_listener(Stage::OnBeforeRequest, RequestFilter::default(), |details| {
                if details.url.contains("boom") {
                    panic!("handler failure");
                }
                None
            })
            .unwrap();
        outbox.recv().await.unwrap();

        let details = RequestDetails {
            url: "https://boom.example/".into(),
            ..Default::default()
        };
        let intercepted = format!("{WEB_REQUEST_INTERCEPTED_PREFIX}onBeforeRequest-{listener_id}");
        let cid = new_correlation_id();
        assert!(client.deliver(&intercepted, json!([details, cid])));

        let (channel, answer) = outbox.recv().await.unwrap();
        assert_eq!(channel, format!("api-webRequest-response-onBeforeRequest-{listener_id}-{cid}"));
        assert_eq!(answer, Value::Null);
    }

    #[tokio::test]
    async fn test_badge_update_is_acknowledged() {
        let (client, mut outbox) = client();
        let mut badges = client.badge_updates();
        let cid = new_correlation_id();

        assert!(client.deliver(BADGE_TEXT_BROADCAST, json!([cid, "ext", {"text": "3"}])));
        let update = badges.recv().await.unwrap();
        assert_eq!(update.details.text, "3");

        client.acknowledge_badge(&update.correlation_id).unwrap();
        let (channel, _) = outbox.recv().await.unwrap();
        assert_eq!(channel, format!("api-browserAction-setBadgeText-{cid}"));
    }

    /// Forwards requests into a host as if they came from `contents`.
    struct HostTransport {
        host: Arc<ExtensionsHost>,
        contents: ContentsRef,
    }

    impl Transport for HostTransport {
        fn send(&self, channel: &str, payload: Value) -> BridgeResult<()> {
            let host = Arc::clone(&self.host);
            let contents = Arc::clone(&self.contents);
            let channel = channel.to_string();
            tokio::spawn(async move {
                if let Err(e) = host.handle_message(contents, &channel, payload).await {
                    tracing::warn!(channel = %channel, error = %e, "request failed");
                }
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_client_against_host() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = BridgeConfig::default();
        config.storage.directory = temp_dir.path().join("storage").to_string_lossy().into_owned();
        let delegate = Arc::new(FakeDelegate::default());
        let host = Arc::new(ExtensionsHost::with_delegate(config, delegate.clone()));
        let session = host.create_session(SessionOptions::new("p"));

        let dir = write_extension(
            temp_dir.path(),
            "ext",
            &json!({"name": "E", "background": {"scripts": ["bg.js"]}}),
        );
        host.load_extension(&session, &dir).await.unwrap();
        let background: Arc<FakeContents> = delegate.background_pages().pop().unwrap();

        let transport = HostTransport {
            host: Arc::clone(&host),
            contents: background.clone(),
        };
        let client = ExtensionClient::new(Arc::new(transport), session.id(), Some("ext".into()), None);
        let inbound = Arc::clone(&client);
        background.on_send(move |channel, payload| {
            inbound.deliver(channel, payload.clone());
        });

        let mut changes = client.subscribe("storage.onChanged");
        let items = json!({"k": "v"}).as_object().unwrap().clone();
        client
            .storage(StorageAreaName::Local, StorageOperation::Set { items })
            .await
            .unwrap();
        let stored = client
            .storage(StorageAreaName::Local, StorageOperation::Get { keys: Value::Null })
            .await
            .unwrap();
        assert_eq!(stored, json!({"k": "v"}));
        assert_eq!(changes.recv().await.unwrap()[0]["k"]["newValue"], "v");

        assert!(client.tabs_query(QueryInfo::default()).await.unwrap().is_empty());
    }
}
