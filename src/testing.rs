//! In-memory stand-ins for the embedder's handles, used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::cookies::{Cookie, CookieStore};
use crate::contents::{
    Bounds, BrowserWindow, ContentsId, ContentsKind, ContentsRef, CssOrigin, TabId, WebContents,
    WindowId, WindowRef, WindowType,
};
use crate::error::{BridgeError, BridgeResult};
use crate::extension::Extension;
use crate::host::HostDelegate;
use crate::identity::TabDetails;
use crate::ipc::types::{CookieFilter, CreateProperties, SetCookieDetails, WindowCreateData};
use crate::session::Session;
use crate::sync::lock;

type SendHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct ContentsState {
    url: String,
    title: String,
    loading: bool,
    audible: bool,
    muted: bool,
    focused: bool,
    sent: Vec<(String, Value)>,
    css: Vec<(String, CssOrigin)>,
    scripts: Vec<String>,
    reloads: Vec<bool>,
}

/// A content handle that records everything sent to it.
pub struct FakeContents {
    id: ContentsId,
    kind: ContentsKind,
    partition: String,
    destroyed: AtomicBool,
    state: Mutex<ContentsState>,
    hook: Mutex<Option<SendHook>>,
}

impl FakeContents {
    pub fn new(id: ContentsId, kind: ContentsKind, partition: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            partition: partition.to_string(),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(ContentsState::default()),
            hook: Mutex::new(None),
        })
    }

    pub fn set_url(&self, url: &str) {
        lock(&self.state).url = url.to_string();
    }

    pub fn set_title(&self, title: &str) {
        lock(&self.state).title = title.to_string();
    }

    pub fn set_loading(&self, loading: bool) {
        lock(&self.state).loading = loading;
    }

    pub fn set_audible(&self, audible: bool) {
        lock(&self.state).audible = audible;
    }

    pub fn set_focused(&self, focused: bool) {
        lock(&self.state).focused = focused;
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// Run `hook` after every successful send, outside the state lock.
    pub fn on_send(&self, hook: impl Fn(&str, &Value) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(hook));
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_on(&self, channel: &str) -> Vec<Value> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|(sent_channel, _)| sent_channel == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn inserted_css(&self) -> Vec<(String, CssOrigin)> {
        lock(&self.state).css.clone()
    }

    pub fn executed_scripts(&self) -> Vec<String> {
        lock(&self.state).scripts.clone()
    }

    pub fn reloads(&self) -> Vec<bool> {
        lock(&self.state).reloads.clone()
    }
}

#[async_trait]
impl WebContents for FakeContents {
    fn id(&self) -> ContentsId {
        self.id
    }

    fn kind(&self) -> ContentsKind {
        self.kind
    }

    fn partition(&self) -> String {
        self.partition.clone()
    }

    fn url(&self) -> String {
        lock(&self.state).url.clone()
    }

    fn title(&self) -> String {
        lock(&self.state).title.clone()
    }

    fn is_focused(&self) -> bool {
        lock(&self.state).focused
    }

    fn is_audible(&self) -> bool {
        lock(&self.state).audible
    }

    fn is_audio_muted(&self) -> bool {
        lock(&self.state).muted
    }

    fn set_audio_muted(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn load_url(&self, url: &str) -> BridgeResult<()> {
        self.set_url(url);
        Ok(())
    }

    fn reload(&self, bypass_cache: bool) {
        lock(&self.state).reloads.push(bypass_cache);
    }

    fn insert_css(&self, code: &str, origin: CssOrigin) {
        lock(&self.state).css.push((code.to_string(), origin));
    }

    async fn execute_javascript(&self, code: &str) -> BridgeResult<Value> {
        lock(&self.state).scripts.push(code.to_string());
        Ok(Value::Null)
    }

    fn send(&self, channel: &str, payload: Value) -> BridgeResult<()> {
        if self.is_destroyed() {
            return Err(BridgeError::Transport(format!("contents {} is destroyed", self.id)));
        }

        lock(&self.state).sent.push((channel.to_string(), payload.clone()));
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(channel, &payload);
        }
        Ok(())
    }
}

#[derive(Default)]
struct WindowState {
    focused: bool,
    maximized: bool,
}

pub struct FakeWindow {
    id: WindowId,
    contents_id: ContentsId,
    window_type: WindowType,
    state: Mutex<WindowState>,
}

impl FakeWindow {
    pub fn new(id: WindowId, contents_id: ContentsId) -> Arc<Self> {
        Arc::new(Self {
            id,
            contents_id,
            window_type: WindowType::Normal,
            state: Mutex::new(WindowState::default()),
        })
    }

    pub fn with_type(self: Arc<Self>, window_type: WindowType) -> Arc<Self> {
        let (focused, maximized) = {
            let state = lock(&self.state);
            (state.focused, state.maximized)
        };
        Arc::new(Self {
            id: self.id,
            contents_id: self.contents_id,
            window_type,
            state: Mutex::new(WindowState { focused, maximized }),
        })
    }

    pub fn set_focused(&self, focused: bool) {
        lock(&self.state).focused = focused;
    }

    pub fn set_maximized(&self, maximized: bool) {
        lock(&self.state).maximized = maximized;
    }
}

impl BrowserWindow for FakeWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn contents_id(&self) -> ContentsId {
        self.contents_id
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        }
    }

    fn is_focused(&self) -> bool {
        lock(&self.state).focused
    }

    fn is_fullscreen(&self) -> bool {
        false
    }

    fn is_maximized(&self) -> bool {
        lock(&self.state).maximized
    }

    fn is_minimized(&self) -> bool {
        false
    }

    fn window_type(&self) -> WindowType {
        self.window_type
    }
}

/// Cookie jar keyed by `(domain, name)`.
#[derive(Default)]
pub struct FakeCookieStore {
    cookies: Mutex<HashMap<(String, String), Cookie>>,
}

impl FakeCookieStore {
    pub fn insert(&self, cookie: Cookie) {
        lock(&self.cookies).insert((cookie.domain.clone(), cookie.name.clone()), cookie);
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl CookieStore for FakeCookieStore {
    async fn get(&self, filter: &CookieFilter) -> BridgeResult<Vec<Cookie>> {
        let host = filter.url.as_deref().map(host_of);
        let mut cookies: Vec<Cookie> = lock(&self.cookies)
            .values()
            .filter(|cookie| host.as_ref().map_or(true, |host| *host == cookie.domain))
            .filter(|cookie| filter.name.as_ref().map_or(true, |name| *name == cookie.name))
            .cloned()
            .collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cookies)
    }

    async fn set(&self, details: &SetCookieDetails) -> BridgeResult<()> {
        let domain = details.domain.clone().unwrap_or_else(|| host_of(&details.url));
        self.insert(Cookie {
            name: details.name.clone().unwrap_or_default(),
            value: details.value.clone().unwrap_or_default(),
            domain,
            path: details.path.clone().unwrap_or_else(|| "/".to_string()),
            secure: details.secure.unwrap_or(false),
            http_only: details.http_only.unwrap_or(false),
            session: details.expiration_date.is_none(),
            expiration_date: details.expiration_date,
            ..Default::default()
        });
        Ok(())
    }

    async fn remove(&self, url: &str, name: &str) -> BridgeResult<()> {
        lock(&self.cookies).remove(&(host_of(url), name.to_string()));
        Ok(())
    }
}

/// Delegate that opens fake tabs, windows and background pages.
#[derive(Default)]
pub struct FakeDelegate {
    next_id: AtomicI64,
    selected: Mutex<Vec<TabId>>,
    backgrounds: Mutex<Vec<Arc<FakeContents>>>,
}

impl FakeDelegate {
    /// Favicon given to tabs that report none.
    pub const DEFAULT_FAVICON: &'static str = "fake://favicon.ico";

    fn allocate_id(&self) -> i64 {
        10_000 + self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn selected(&self) -> Vec<TabId> {
        lock(&self.selected).clone()
    }

    pub fn background_pages(&self) -> Vec<Arc<FakeContents>> {
        lock(&self.backgrounds).clone()
    }
}

#[async_trait]
impl HostDelegate for FakeDelegate {
    async fn create_tab(
        &self,
        session: &Session,
        props: &CreateProperties,
    ) -> BridgeResult<(ContentsRef, WindowId)> {
        let contents = FakeContents::new(self.allocate_id(), ContentsKind::BrowserView, session.partition());
        if let Some(url) = &props.url {
            contents.set_url(url);
        }
        let handle: ContentsRef = contents;
        Ok((handle, props.window_id.unwrap_or(1)))
    }

    async fn create_window(&self, _session: &Session, data: &WindowCreateData) -> BridgeResult<WindowRef> {
        let id = self.allocate_id();
        let window = FakeWindow::new(id, id + 1);
        window.set_focused(data.focused.unwrap_or(false));
        let handle: WindowRef = window;
        Ok(handle)
    }

    async fn create_background_page(
        &self,
        _session: &Session,
        extension: &Extension,
        url: &str,
    ) -> BridgeResult<Option<ContentsRef>> {
        let contents = FakeContents::new(
            self.allocate_id(),
            ContentsKind::BackgroundPage,
            &format!("background:{}", extension.id),
        );
        contents.set_url(url);
        lock(&self.backgrounds).push(contents.clone());
        let handle: ContentsRef = contents;
        Ok(Some(handle))
    }

    fn select_tab(&self, _session: &Session, contents: &ContentsRef) {
        lock(&self.selected).push(contents.id());
    }

    fn decorate_tab(&self, _contents: &dyn WebContents, details: &mut TabDetails) {
        if details.fav_icon_url.is_none() {
            details.fav_icon_url = Some(Self::DEFAULT_FAVICON.to_string());
        }
    }
}
