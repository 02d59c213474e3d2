//! The host: one object owning every registry, injected into every manager.
//!
//! The embedding application creates an [`ExtensionsHost`], creates sessions
//! on it, hands it content handles and windows, and forwards three kinds of
//! traffic:
//!
//! - renderer messages, through [`ExtensionsHost::handle_message`],
//! - lifecycle notifications, through [`ExtensionsHost::contents_event`] and
//!   [`ExtensionsHost::window_event`],
//! - network hooks, through [`ExtensionsHost::intercept`].
//!
//! Operations the host cannot perform itself (opening tabs and windows,
//! spawning background pages) are delegated to a [`HostDelegate`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{
    AlarmsApi, BrowserActionApi, Cookie, CookieChangeCause, CookiesApi, RuntimeApi, StorageApi,
    TabsApi, WebNavigationApi, WindowsApi,
};
use crate::config::BridgeConfig;
use crate::contents::{
    ContentsEvent, ContentsId, ContentsRef, TabId, WebContents, WindowEvent, WindowId, WindowRef,
};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{deliver, EventBus};
use crate::extension::{ContentScript, Extension, ExtensionId};
use crate::identity::{QueryInfo, TabDetails};
use crate::ipc::channel::{
    self, api_prefix, reply_channel, Route, SessionId, BADGE_TEXT_BROADCAST,
    RUNTIME_SEND_MESSAGE_RESPONSE, WEB_REQUEST_RESPONSE_PREFIX,
};
use crate::ipc::message::{ApiRequest, RequestEnvelope};
use crate::ipc::types::{CreateProperties, WindowCreateData};
use crate::ports::PortManager;
use crate::protocol::{self, ProtocolResponse};
use crate::session::{Session, SessionOptions, SessionRegistry};
use crate::web_request::{InterceptOutcome, RequestDetails, Stage, WebRequestPipeline};

/// Embedder hooks. Every method has a default, so an application only
/// implements what it supports.
#[async_trait]
pub trait HostDelegate: Send + Sync {
    /// Open a tab. Returns the new handle and the window it lives in.
    async fn create_tab(
        &self,
        _session: &Session,
        _props: &CreateProperties,
    ) -> BridgeResult<(ContentsRef, WindowId)> {
        Err(BridgeError::Unsupported("tabs.create"))
    }

    async fn create_window(&self, _session: &Session, _data: &WindowCreateData) -> BridgeResult<WindowRef> {
        Err(BridgeError::Unsupported("windows.create"))
    }

    /// Spawn the background page of a freshly loaded extension at `url`.
    /// `None` leaves the extension without one.
    async fn create_background_page(
        &self,
        _session: &Session,
        _extension: &Extension,
        _url: &str,
    ) -> BridgeResult<Option<ContentsRef>> {
        Ok(None)
    }

    /// Bring a tab to the front in its native window.
    fn select_tab(&self, _session: &Session, _contents: &ContentsRef) {}

    /// Amend computed tab details before they are cached.
    fn decorate_tab(&self, _contents: &dyn WebContents, _details: &mut TabDetails) {}
}

/// Delegate that supports nothing beyond the defaults.
#[derive(Debug, Default)]
pub struct DefaultDelegate;

impl HostDelegate for DefaultDelegate {}

pub struct ExtensionsHost {
    config: BridgeConfig,
    delegate: Arc<dyn HostDelegate>,
    sessions: SessionRegistry,
    bus: Arc<EventBus>,
    pipeline: Arc<WebRequestPipeline>,
    ports: PortManager,
    tabs: TabsApi,
    windows: WindowsApi,
    cookies: CookiesApi,
    browser_action: BrowserActionApi,
    alarms: AlarmsApi,
    runtime: RuntimeApi,
    navigation: WebNavigationApi,
    storage: StorageApi,
}

impl std::fmt::Debug for ExtensionsHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionsHost")
            .field("sessions", &self.sessions.all().len())
            .field("listeners", &self.bus.listener_count())
            .field("web_request_listeners", &self.pipeline.listener_count())
            .field("ports", &self.ports.port_count())
            .finish()
    }
}

impl ExtensionsHost {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_delegate(config, Arc::new(DefaultDelegate))
    }

    pub fn with_delegate(config: BridgeConfig, delegate: Arc<dyn HostDelegate>) -> Self {
        let bus = Arc::new(EventBus::new());
        let sessions = SessionRegistry::new(
            config.storage.resolved_directory(),
            config.session.injection_blacklist.clone(),
        );

        Self {
            sessions,
            pipeline: Arc::new(WebRequestPipeline::new(config.web_request.listener_timeout())),
            ports: PortManager::new(bus.clone()),
            tabs: TabsApi::new(bus.clone(), delegate.clone()),
            windows: WindowsApi::new(bus.clone(), delegate.clone()),
            cookies: CookiesApi::new(bus.clone()),
            browser_action: BrowserActionApi::new(bus.clone(), config.ipc.rendezvous_timeout()),
            alarms: AlarmsApi::new(bus.clone()),
            runtime: RuntimeApi::new(bus.clone(), config.ipc.message_response_timeout()),
            navigation: WebNavigationApi::new(bus.clone()),
            storage: StorageApi::new(bus.clone()),
            bus,
            delegate,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn pipeline(&self) -> &Arc<WebRequestPipeline> {
        &self.pipeline
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    // ─── Sessions ───────────────────────────────────────────────────────────

    pub fn create_session(&self, options: SessionOptions) -> Arc<Session> {
        let session = self.sessions.create(options);
        let delegate = Arc::clone(&self.delegate);
        session
            .registry
            .set_decorator(Arc::new(move |contents: &dyn WebContents, details: &mut TabDetails| {
                delegate.decorate_tab(contents, details)
            }));
        session
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.all()
    }

    // ─── Extensions ─────────────────────────────────────────────────────────

    /// Load an unpacked extension into `session` and start its background
    /// page through the delegate.
    pub async fn load_extension(&self, session: &Session, dir: &Path) -> BridgeResult<Arc<Extension>> {
        let (extension, fresh) = session.load_extension(dir).await?;
        if !fresh {
            return Ok(extension);
        }

        if let Some(file) = extension.background_file() {
            let url = protocol::extension_url(&self.config.protocol.scheme, &extension.id, file);
            match self.delegate.create_background_page(session, &extension, &url).await {
                Ok(Some(contents)) => self.set_background_page(session, &extension, contents),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(extension_id = %extension.id, error = %e, "background page not started");
                }
            }
        }

        Ok(extension)
    }

    /// Register `contents` as the background page of `extension`.
    pub fn set_background_page(&self, session: &Session, extension: &Extension, contents: ContentsRef) {
        tracing::debug!(
            session_id = session.id(),
            extension_id = %extension.id,
            contents_id = contents.id(),
            "background page attached"
        );
        extension.set_background_contents(Some(Arc::clone(&contents)));
        self.bus.add_listener_context(session.id(), contents);
    }

    pub fn unload_extension(&self, session: &Session, id: &str) -> bool {
        let background = session.extension(id).and_then(|extension| extension.background_contents());
        let Some(extension) = session.unload_extension(id) else {
            return false;
        };

        extension.alarms.clear_all();
        if let Some(background) = background {
            self.forget_contents(background.id());
        }
        true
    }

    pub async fn content_scripts_for(&self, session: &Session, url: &str) -> Vec<(ExtensionId, ContentScript)> {
        session.content_scripts_for(url).await
    }

    pub async fn resolve_protocol(&self, session: &Session, url: &str) -> ProtocolResponse {
        protocol::resolve(session, &self.config.protocol.scheme, url).await
    }

    // ─── Handles ────────────────────────────────────────────────────────────

    /// Make a non-tab page (popup, options page, browser UI) reachable.
    pub fn attach_contents(&self, session: &Session, contents: ContentsRef) {
        self.bus.attach(session.id(), contents);
    }

    pub fn observe_tab(&self, session: &Session, contents: ContentsRef, window_id: WindowId) {
        self.tabs.observe(session, contents, window_id);
    }

    pub fn add_window(&self, session: &Session, window: WindowRef) {
        self.windows.observe(session, window);
    }

    pub fn activate_tab(&self, session: &Session, id: TabId) -> bool {
        self.tabs.activate(session, id)
    }

    /// Lifecycle notification for any attached handle.
    pub fn contents_event(&self, id: ContentsId, event: &ContentsEvent) {
        let Some(session) = self.bus.session_of(id).and_then(|sid| self.sessions.get(sid)) else {
            tracing::debug!(contents_id = id, ?event, "event for unattached contents");
            return;
        };

        if let Some(contents) = self.bus.contents(id) {
            self.navigation.handle_event(&session, contents.as_ref(), event);
        }
        self.tabs.handle_event(&session, id, event);

        if *event == ContentsEvent::Destroyed {
            if let Some(extension) = session.extension_for_background(id) {
                extension.set_background_contents(None);
            }
            self.forget_contents(id);
        }
    }

    pub fn window_event(&self, id: WindowId, event: WindowEvent) {
        let owner = self
            .sessions
            .all()
            .into_iter()
            .find(|session| session.registry.window(id).is_some());

        match owner {
            Some(session) => self.windows.handle_event(&session, id, event),
            None => tracing::debug!(window_id = id, ?event, "event for unknown window"),
        }
    }

    fn forget_contents(&self, id: ContentsId) {
        self.runtime.forget_contents(id);
        self.ports.contents_destroyed(id);
        self.pipeline.remove_listeners_for(id);
        self.bus.detach(id);
    }

    // ─── Host-originated events ─────────────────────────────────────────────

    /// Run one web-request stage for a request made in `session_id`.
    pub async fn intercept(&self, session_id: SessionId, stage: Stage, details: &RequestDetails) -> InterceptOutcome {
        self.pipeline.dispatch(session_id, stage, details).await
    }

    pub fn cookie_changed(&self, session: &Session, cookie: Cookie, cause: CookieChangeCause, removed: bool) {
        self.cookies.changed(session, cookie, cause, removed);
    }

    /// The user clicked an extension's action button.
    pub fn browser_action_clicked(&self, session: &Session, extension_id: &str, tab_id: Option<TabId>) -> bool {
        match session.extension(extension_id) {
            Some(extension) => self.browser_action.clicked(session, &extension, tab_id),
            None => false,
        }
    }

    pub fn broadcast_to_extensions(&self, event: &str, args: Vec<Value>) -> usize {
        self.bus.broadcast_to_extensions(event, args)
    }

    /// Raw message to every handle of a session, background pages included.
    pub fn send_to_all(&self, session_id: SessionId, channel: &str, payload: Value) -> usize {
        self.bus.send_to_session(session_id, channel, payload, None)
    }

    // ─── Renderer traffic ───────────────────────────────────────────────────

    /// Route one message sent by a renderer.
    ///
    /// Requests are answered on their reply channel when they carry a
    /// response id. Callers outside every session are refused.
    pub async fn handle_message(&self, sender: ContentsRef, channel_name: &str, payload: Value) -> BridgeResult<()> {
        let route = channel::parse(channel_name)
            .ok_or_else(|| BridgeError::UnknownChannel(channel_name.to_string()))?;

        let (domain, operation, session_id) = match route {
            Route::Reply { .. } => {
                self.deliver_reply(channel_name, payload);
                return Ok(());
            }
            Route::Api {
                domain,
                operation,
                session_id,
            } => (domain, operation, session_id),
        };

        let session = self
            .sessions
            .resolve(sender.as_ref())
            .filter(|session| session.id() == session_id)
            .ok_or_else(|| {
                tracing::warn!(
                    contents_id = sender.id(),
                    channel = channel_name,
                    "request from a context outside the addressed session"
                );
                BridgeError::SessionNotFound(session_id)
            })?;

        let envelope: RequestEnvelope =
            serde_json::from_value(payload).map_err(|e| BridgeError::malformed(channel_name, e))?;
        if envelope.request.route() != (domain, operation) {
            return Err(BridgeError::malformed(
                channel_name,
                format!("operation {:?} does not match the channel", envelope.request.route()),
            ));
        }

        if self.bus.contents(sender.id()).is_none() {
            self.bus.attach(session.id(), Arc::clone(&sender));
        }

        tracing::debug!(
            session_id,
            contents_id = sender.id(),
            channel = channel_name,
            "api request"
        );

        let result = self
            .dispatch(&session, &sender, envelope.extension_id.as_deref(), envelope.request)
            .await;

        if let Some(response_id) = envelope.response_id {
            let reply = reply_channel(&api_prefix(domain, operation), &response_id);
            deliver(sender.as_ref(), &reply, result);
        }
        Ok(())
    }

    /// Hand a reply from a renderer to whoever is waiting for it. Replies
    /// nobody waits for are dropped.
    pub fn deliver_reply(&self, channel_name: &str, payload: Value) -> bool {
        let Some(Route::Reply { prefix, correlation_id }) = channel::parse(channel_name) else {
            return false;
        };

        if prefix == RUNTIME_SEND_MESSAGE_RESPONSE {
            self.runtime.relay_response(correlation_id, payload)
        } else if prefix == BADGE_TEXT_BROADCAST {
            self.browser_action.acknowledge(correlation_id, payload)
        } else if prefix.starts_with(WEB_REQUEST_RESPONSE_PREFIX) {
            self.pipeline.resolve(correlation_id, payload)
        } else {
            tracing::debug!(channel = channel_name, "dropping unexpected reply");
            false
        }
    }

    async fn dispatch(
        &self,
        session: &Session,
        caller: &ContentsRef,
        claimed_extension: Option<&str>,
        request: ApiRequest,
    ) -> Value {
        let caller_id = caller.id();
        let extension = self.calling_extension(session, caller_id, claimed_extension);

        match request {
            // tabs
            ApiRequest::TabsGet { tab_id } => json!(self.tabs.get(session, tab_id)),
            ApiRequest::TabsGetCurrent => json!(self.tabs.get_current(session, caller_id)),
            ApiRequest::TabsQuery { query } => json!(self.tabs.query(session, &query)),
            ApiRequest::TabsUpdate { tab_id, props } => {
                match self.target_tab(session, caller_id, tab_id) {
                    Some(id) => json!(self.tabs.update(session, id, &props).await),
                    None => Value::Null,
                }
            }
            ApiRequest::TabsReload { tab_id, props } => {
                if let Some(id) = self.target_tab(session, caller_id, tab_id) {
                    self.tabs.reload(session, id, &props);
                }
                Value::Null
            }
            ApiRequest::TabsCreate { props } => json!(self.tabs.create(session, &props).await),
            ApiRequest::TabsInsertCss { tab_id, details } => {
                if let (Some(extension), Some(id)) = (&extension, self.target_tab(session, caller_id, tab_id)) {
                    self.tabs.insert_css(session, extension, id, &details).await;
                }
                Value::Null
            }
            ApiRequest::TabsExecuteScript { tab_id, details } => {
                match (&extension, self.target_tab(session, caller_id, tab_id)) {
                    (Some(extension), Some(id)) => {
                        json!(self.tabs.execute_script(session, extension, id, &details).await)
                    }
                    _ => Value::Null,
                }
            }
            ApiRequest::TabsSendMessage {
                tab_id,
                message,
                response_id,
            } => {
                let sender_id = extension.as_ref().map_or("", |extension| extension.id.as_str());
                let sender = self.runtime.sender_for(session, caller.as_ref(), sender_id);
                if let Some(response_id) = &response_id {
                    self.runtime.expect_response(response_id, caller_id, tab_id);
                }
                let delivered = self
                    .tabs
                    .send_message(session, tab_id, &sender, message, response_id.as_deref());
                if let (false, Some(response_id)) = (delivered, &response_id) {
                    self.runtime.relay_response(response_id, Value::Null);
                }
                Value::Null
            }

            // windows
            ApiRequest::WindowsGet { window_id, info } => json!(self.windows.get(session, window_id, &info)),
            ApiRequest::WindowsGetCurrent { info } => {
                json!(self.windows.get_current(session, caller_id, &info))
            }
            ApiRequest::WindowsGetLastFocused { info } => {
                json!(self.windows.get_last_focused(session, &info))
            }
            ApiRequest::WindowsGetAll { info } => json!(self.windows.get_all(session, &info)),
            ApiRequest::WindowsCreate { data } => json!(self.windows.create(session, &data).await),

            // cookies
            ApiRequest::CookiesGet { details } => json!(self.cookies.get(session, &details).await),
            ApiRequest::CookiesGetAll { details } => json!(self.cookies.get_all(session, &details).await),
            ApiRequest::CookiesSet { details } => self.cookies.set(session, &details).await,
            ApiRequest::CookiesRemove { details } => self.cookies.remove(session, &details).await,

            // browserAction
            ApiRequest::SetBadgeText { details } => {
                if let Some(extension) = &extension {
                    self.browser_action.set_badge_text(session, extension, &details).await;
                }
                Value::Null
            }
            ApiRequest::GetBadgeText { details } => extension
                .as_ref()
                .map_or(Value::Null, |extension| json!(self.browser_action.get_badge_text(extension, &details))),
            ApiRequest::SetBadgeBackgroundColor { details } => {
                if let Some(extension) = &extension {
                    self.browser_action.set_badge_background_color(extension, &details);
                }
                Value::Null
            }
            ApiRequest::GetBadgeBackgroundColor { details } => extension.as_ref().map_or(Value::Null, |extension| {
                json!(self.browser_action.get_badge_background_color(extension, &details))
            }),
            ApiRequest::BrowserActionClick { extension_id, tab_id } => {
                json!(self.browser_action_clicked(session, &extension_id, tab_id))
            }

            // storage
            ApiRequest::Storage { area, operation } => {
                let Some(extension) = &extension else {
                    return Value::Null;
                };
                match self.storage.operate(extension, caller_id, area, operation).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(extension_id = %extension.id, error = %e, "storage operation failed");
                        Value::Null
                    }
                }
            }

            // runtime
            ApiRequest::RuntimeSendMessage {
                extension_id,
                message,
                response_id,
            } => {
                let target = extension_id
                    .as_deref()
                    .and_then(|id| session.extension(id))
                    .or_else(|| extension.clone());
                let delivered = target.as_ref().is_some_and(|target| {
                    let sender_id = extension.as_ref().map_or(target.id.as_str(), |own| own.id.as_str());
                    let sender = self.runtime.sender_for(session, caller.as_ref(), sender_id);
                    self.runtime
                        .send_message(target, caller_id, &sender, message, response_id.as_deref())
                });

                // Nobody will answer, so release the sender right away.
                if let (false, Some(response_id)) = (delivered, &response_id) {
                    let reply = reply_channel(RUNTIME_SEND_MESSAGE_RESPONSE, response_id);
                    deliver(caller.as_ref(), &reply, Value::Null);
                }
                Value::Null
            }
            ApiRequest::RuntimeConnect {
                port_id,
                extension_id,
                name,
            } => {
                let target = extension_id
                    .as_deref()
                    .and_then(|id| session.extension(id))
                    .or_else(|| extension.clone());
                let sender_id = extension
                    .as_ref()
                    .or(target.as_ref())
                    .map_or("", |extension| extension.id.as_str());
                let sender = self.runtime.sender_for(session, caller.as_ref(), sender_id);
                json!(self.ports.connect(
                    session,
                    target.as_deref(),
                    caller_id,
                    &port_id,
                    name.as_deref(),
                    &sender,
                ))
            }
            ApiRequest::RuntimeReload => {
                json!(extension.as_ref().is_some_and(|extension| self.runtime.reload(extension)))
            }

            // ports
            ApiRequest::PortPostMessage { port_id, message } => {
                json!(self.ports.post_message(session.id(), caller_id, &port_id, message))
            }
            ApiRequest::PortDisconnect { port_id } => {
                json!(self.ports.disconnect(session.id(), caller_id, &port_id))
            }

            // alarms
            ApiRequest::AlarmsCreate { name, info } => {
                if let Some(extension) = &extension {
                    self.alarms.create(&extension.alarms, caller_id, &name, &info);
                }
                Value::Null
            }
            ApiRequest::AlarmsGet { name } => extension
                .as_ref()
                .map_or(Value::Null, |extension| json!(extension.alarms.get(&name))),
            ApiRequest::AlarmsGetAll => extension
                .as_ref()
                .map_or_else(|| json!([]), |extension| json!(extension.alarms.all())),
            ApiRequest::AlarmsClear { name } => {
                json!(extension.as_ref().is_some_and(|extension| extension.alarms.clear(&name)))
            }
            ApiRequest::AlarmsClearAll => {
                json!(extension.as_ref().is_some_and(|extension| extension.alarms.clear_all() > 0))
            }

            // webRequest
            ApiRequest::WebRequestAddListener {
                listener_id,
                event,
                filter,
            } => {
                self.pipeline
                    .add_listener(session.id(), Arc::clone(caller), &listener_id, event, &filter);
                Value::Null
            }
            ApiRequest::WebRequestRemoveListener { listener_id } => {
                json!(self.pipeline.remove_listener(caller_id, &listener_id))
            }

            // extensions
            ApiRequest::ExtensionsGet { extension_id } => {
                json!(self.runtime.extension_info(session, &extension_id).await)
            }
            ApiRequest::ExtensionsGetAll => json!(self.runtime.extensions_info(session).await),
            ApiRequest::ExtensionsBroadcast { channel, args } => {
                json!(self.bus.send_to_session(session.id(), &channel, Value::Array(args), Some(caller_id)))
            }
        }
    }

    /// The extension a request acts for: the one it names, else the one
    /// whose background page sent it.
    fn calling_extension(
        &self,
        session: &Session,
        caller: ContentsId,
        claimed: Option<&str>,
    ) -> Option<Arc<Extension>> {
        claimed
            .and_then(|id| session.extension(id))
            .or_else(|| session.extension_for_background(caller))
    }

    /// An explicit tab id, or the active tab of the caller's window (the
    /// focused window for callers that are not tabs).
    fn target_tab(&self, session: &Session, caller: ContentsId, tab_id: Option<TabId>) -> Option<TabId> {
        if tab_id.is_some() {
            return tab_id;
        }

        let window_id = session
            .registry
            .window_of_tab(caller)
            .or_else(|| session.registry.focused_window())?;
        let query = QueryInfo {
            active: Some(true),
            window_id: Some(window_id),
            ..Default::default()
        };
        session.registry.query_tabs(&query).first().map(|tab| tab.id)
    }
}
