//! `chrome.browserAction`: badge state and click delivery.
//!
//! Badge text is a broadcast-and-await mutation: the new text is pushed to
//! every window-level handle of the session tagged with a rendezvous id, and
//! the caller resumes once the first of them acknowledges on
//! `api-browserAction-setBadgeText-<id>` (or the rendezvous timeout passes).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::contents::{ContentsRef, TabId};
use crate::events::{deliver, EventBus};
use crate::extension::Extension;
use crate::ipc::channel::BADGE_TEXT_BROADCAST;
use crate::ipc::correlator::Correlator;
use crate::ipc::types::{BadgeColorDetails, BadgeTextDetails, ColorSpec, TabSelector};
use crate::session::Session;
use crate::sync::lock;

pub type Rgba = [u8; 4];

const DEFAULT_BADGE_COLOR: Rgba = [0, 0, 0, 0];

#[derive(Default)]
struct BadgeInner {
    text: Option<String>,
    tab_text: HashMap<TabId, String>,
    color: Option<Rgba>,
    tab_color: HashMap<TabId, Rgba>,
}

/// Badge text and color of one extension, global and per tab.
#[derive(Default)]
pub struct BadgeState {
    inner: Mutex<BadgeInner>,
}

impl BadgeState {
    pub fn set_text(&self, tab_id: Option<TabId>, text: &str) {
        let mut inner = lock(&self.inner);
        match tab_id {
            Some(tab_id) => {
                inner.tab_text.insert(tab_id, text.to_string());
            }
            None => inner.text = Some(text.to_string()),
        }
    }

    /// Per-tab text falls back to the global text.
    pub fn text(&self, tab_id: Option<TabId>) -> String {
        let inner = lock(&self.inner);
        tab_id
            .and_then(|tab_id| inner.tab_text.get(&tab_id).cloned())
            .or_else(|| inner.text.clone())
            .unwrap_or_default()
    }

    pub fn set_color(&self, tab_id: Option<TabId>, color: Rgba) {
        let mut inner = lock(&self.inner);
        match tab_id {
            Some(tab_id) => {
                inner.tab_color.insert(tab_id, color);
            }
            None => inner.color = Some(color),
        }
    }

    pub fn color(&self, tab_id: Option<TabId>) -> Rgba {
        let inner = lock(&self.inner);
        tab_id
            .and_then(|tab_id| inner.tab_color.get(&tab_id).copied())
            .or(inner.color)
            .unwrap_or(DEFAULT_BADGE_COLOR)
    }

    /// Forget per-tab overrides for a closed tab.
    pub fn forget_tab(&self, tab_id: TabId) {
        let mut inner = lock(&self.inner);
        inner.tab_text.remove(&tab_id);
        inner.tab_color.remove(&tab_id);
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. Anything else is `None`.
pub fn parse_color(spec: &ColorSpec) -> Option<Rgba> {
    let hex = match spec {
        ColorSpec::Rgba(rgba) => return Some(*rgba),
        ColorSpec::Css(css) => css.trim().strip_prefix('#')?,
    };

    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgba = [0, 0, 0, 255];
            for (i, c) in hex.chars().enumerate() {
                let digit = c.to_digit(16)? as u8;
                rgba[i] = digit * 17;
            }
            Some(rgba)
        }
        6 | 8 => {
            let alpha = if hex.len() == 8 { channel(hex.get(6..8)?)? } else { 255 };
            Some([
                channel(hex.get(0..2)?)?,
                channel(hex.get(2..4)?)?,
                channel(hex.get(4..6)?)?,
                alpha,
            ])
        }
        _ => None,
    }
}

pub struct BrowserActionApi {
    bus: Arc<EventBus>,
    rendezvous: Correlator,
    timeout: Duration,
}

impl BrowserActionApi {
    pub fn new(bus: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            bus,
            rendezvous: Correlator::new(Some(timeout)),
            timeout,
        }
    }

    /// Store the text, push it to the session's windows and wait for the
    /// first acknowledgement.
    pub async fn set_badge_text(&self, session: &Session, extension: &Extension, details: &BadgeTextDetails) {
        extension.badge.set_text(details.tab_id, &details.text);

        let windows = self.window_contents(session);
        if windows.is_empty() {
            return;
        }

        let pending = self.rendezvous.register();
        let payload = json!([pending.id(), extension.id, details]);

        let delivered = windows
            .iter()
            .filter(|contents| deliver(contents.as_ref(), BADGE_TEXT_BROADCAST, payload.clone()))
            .count();
        if delivered == 0 {
            return;
        }

        if let Err(e) = pending.wait(Some(self.timeout)).await {
            tracing::debug!(
                session_id = session.id(),
                extension_id = %extension.id,
                error = %e,
                "badge text not acknowledged"
            );
        }
    }

    /// Acknowledgement from a window. Returns `false` for unknown ids.
    pub fn acknowledge(&self, correlation_id: &str, value: Value) -> bool {
        self.rendezvous.resolve(correlation_id, value)
    }

    pub fn get_badge_text(&self, extension: &Extension, details: &TabSelector) -> String {
        extension.badge.text(details.tab_id)
    }

    pub fn set_badge_background_color(&self, extension: &Extension, details: &BadgeColorDetails) {
        match parse_color(&details.color) {
            Some(color) => extension.badge.set_color(details.tab_id, color),
            None => {
                tracing::warn!(extension_id = %extension.id, color = ?details.color, "ignoring unparseable badge color");
            }
        }
    }

    pub fn get_badge_background_color(&self, extension: &Extension, details: &TabSelector) -> Rgba {
        extension.badge.color(details.tab_id)
    }

    /// Deliver `browserAction.onClicked` to the extension's background page.
    pub fn clicked(&self, session: &Session, extension: &Extension, tab_id: Option<TabId>) -> bool {
        let Some(background) = extension.background_contents() else {
            return false;
        };

        let tab = tab_id
            .and_then(|id| session.registry.tab_details(id))
            .map_or(Value::Null, |tab| json!(tab));
        self.bus
            .emit_to(background.id(), "browserAction.onClicked", vec![tab])
    }

    fn window_contents(&self, session: &Session) -> Vec<ContentsRef> {
        session
            .registry
            .windows()
            .iter()
            .filter_map(|window| self.bus.contents(window.contents_id()))
            .collect()
    }
}
