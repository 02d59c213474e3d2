//! Host engine primitives the bridge is built on.
//!
//! The embedding application owns the real renderer processes and native
//! windows. It hands the bridge trait objects for them and forwards their
//! lifecycle notifications as [`ContentsEvent`] / [`WindowEvent`] values.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeResult;

/// Host-assigned id of a renderer content handle.
pub type ContentsId = i64;

/// Tab ids are the ids of the content handle they wrap.
pub type TabId = i64;

/// Native window id.
pub type WindowId = i64;

pub const TAB_ID_NONE: TabId = -1;
pub const WINDOW_ID_NONE: WindowId = -1;
pub const WINDOW_ID_CURRENT: WindowId = -2;

/// Shared handle to a renderer content view.
pub type ContentsRef = Arc<dyn WebContents>;

/// Shared handle to a native window.
pub type WindowRef = Arc<dyn BrowserWindow>;

/// What kind of view a content handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentsKind {
    /// The top-level document of a native window (the browser UI).
    Window,
    BrowserView,
    Webview,
    BackgroundPage,
    Popup,
}

impl ContentsKind {
    /// Whether this handle shows web content to the user.
    pub fn is_tab(self) -> bool {
        matches!(self, Self::BrowserView | Self::Webview)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CssOrigin {
    #[default]
    Author,
    User,
}

/// A renderer content view owned by the host engine.
#[async_trait]
pub trait WebContents: Send + Sync {
    fn id(&self) -> ContentsId;
    fn kind(&self) -> ContentsKind;

    /// Name of the storage/network partition this view lives in.
    fn partition(&self) -> String;

    fn url(&self) -> String;
    fn title(&self) -> String;
    fn is_focused(&self) -> bool;
    fn is_audible(&self) -> bool;
    fn is_audio_muted(&self) -> bool;
    fn set_audio_muted(&self, muted: bool);
    fn is_loading(&self) -> bool;
    fn is_destroyed(&self) -> bool;

    fn process_id(&self) -> i64 {
        0
    }

    async fn load_url(&self, url: &str) -> BridgeResult<()>;
    fn reload(&self, bypass_cache: bool);
    fn insert_css(&self, code: &str, origin: CssOrigin);
    async fn execute_javascript(&self, code: &str) -> BridgeResult<Value>;

    /// Post an IPC message to the renderer behind this handle.
    fn send(&self, channel: &str, payload: Value) -> BridgeResult<()>;
}

/// Lifecycle notifications for a content handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentsEvent {
    WillNavigate { url: String },
    NavigationStarted { url: String, main_frame: bool },
    NavigationCommitted { url: String },
    NavigatedInPage { url: String },
    LoadStart,
    LoadStop,
    TitleUpdated,
    FaviconUpdated { url: Option<String> },
    AudioStateChanged,
    Destroyed,
}

impl ContentsEvent {
    /// Events after which cached tab details must be recomputed.
    pub fn refreshes_details(&self) -> bool {
        !matches!(self, Self::WillNavigate { .. } | Self::Destroyed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Normal,
    Popup,
    Panel,
    App,
    Devtools,
}

/// A native window owned by the host application.
pub trait BrowserWindow: Send + Sync {
    fn id(&self) -> WindowId;

    /// Id of the window's own top-level content handle.
    fn contents_id(&self) -> ContentsId;

    fn bounds(&self) -> Bounds;
    fn is_focused(&self) -> bool;
    fn is_fullscreen(&self) -> bool;
    fn is_maximized(&self) -> bool;
    fn is_minimized(&self) -> bool;

    fn is_always_on_top(&self) -> bool {
        false
    }

    fn window_type(&self) -> WindowType {
        WindowType::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Focus,
    Blur,
    Closed,
}

/// Delivery-time liveness check shared by every fanout path.
pub fn is_alive(contents: &dyn WebContents) -> bool {
    !contents.is_destroyed()
}
