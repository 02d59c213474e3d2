//! crxbridge - `chrome.*` extension APIs for multi-process desktop shells.
//!
//! Extensions run in renderer contexts (background pages, popups, content
//! scripts) that cannot reach browser state directly. The host side of this
//! crate owns that state and answers their requests over named IPC
//! channels; the client side frames those requests from inside a renderer.
//!
//! # Architecture
//!
//! - [`host`] - Per-process entry point: sessions, dispatch, lifecycle hooks
//! - [`session`] - Isolated profiles with their loaded extensions
//! - [`extension`] - Manifest parsing, background documents, content scripts
//! - [`identity`] - Stable tab and window descriptors with change detection
//! - [`api`] - One manager per `chrome.*` namespace
//! - [`events`] - Fanout of events to listener contexts
//! - [`ports`] - Long-lived `runtime.connect` channels
//! - [`web_request`] - Blocking request interception pipeline
//! - [`storage`] - JSON-file backed `chrome.storage` areas
//! - [`protocol`] - `chrome-extension://` resource resolution
//! - [`ipc`] - Channel naming, correlation and the renderer-side client
//!
//! # Example
//!
//! ```ignore
//! use crxbridge::{BridgeConfig, ExtensionsHost, SessionOptions};
//!
//! let host = ExtensionsHost::new(BridgeConfig::load_default());
//! let session = host.create_session(SessionOptions::new("persist:main"));
//! host.load_extension(&session, "/path/to/extension".as_ref()).await?;
//!
//! // Feed every renderer message into the host.
//! host.handle_message(sender, &channel, payload).await?;
//! ```

pub mod api;
pub mod config;
pub mod contents;
pub mod events;
pub mod extension;
pub mod host;
pub mod identity;
pub mod ipc;
pub mod logging;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod url_pattern;
pub mod web_request;

mod error;
mod sync;

#[cfg(test)]
mod testing;

pub use config::BridgeConfig;
pub use contents::{BrowserWindow, ContentsEvent, ContentsRef, WebContents, WindowEvent};
pub use error::{BridgeError, BridgeResult};
pub use extension::{Extension, ExtensionId};
pub use host::{DefaultDelegate, ExtensionsHost, HostDelegate};
pub use ipc::{ExtensionClient, Transport};
pub use session::{Session, SessionOptions};
