//! Capability managers behind each `chrome.*` namespace.
//!
//! Every manager is a thin layer over the session's identity registry and
//! the event bus. None of them hold session state of their own apart from
//! per-extension badge and alarm lists, which live on the extension.

pub mod alarms;
pub mod browser_action;
pub mod cookies;
pub mod navigation;
pub mod runtime;
pub mod storage;
pub mod tabs;
pub mod windows;

pub use alarms::{Alarm, AlarmList, AlarmsApi};
pub use browser_action::{BadgeState, BrowserActionApi};
pub use cookies::{Cookie, CookieChangeCause, CookieStore, CookiesApi, ExtensionCookie};
pub use navigation::WebNavigationApi;
pub use runtime::RuntimeApi;
pub use storage::StorageApi;
pub use tabs::TabsApi;
pub use windows::WindowsApi;
