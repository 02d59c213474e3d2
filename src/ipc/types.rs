//! Argument types carried by API requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contents::{CssOrigin, TabId, WindowId, WindowType};
use crate::identity::{TabDetails, WindowState};

/// Who sent a message, as seen by the receiving extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    /// Id of the sending extension.
    pub id: String,
    pub url: String,
    pub frame_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_channel_id: Option<String>,
}

// ─── tabs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateProperties {
    pub url: Option<String>,
    pub muted: Option<bool>,
    pub active: Option<bool>,
    pub pinned: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReloadProperties {
    pub bypass_cache: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateProperties {
    pub window_id: Option<WindowId>,
    pub url: Option<String>,
    pub active: Option<bool>,
    pub index: Option<usize>,
    pub pinned: Option<bool>,
}

/// `tabs.insertCSS` / `tabs.executeScript` details. Exactly one of `code`
/// and `file` is expected; `file` is relative to the extension directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectDetails {
    pub code: Option<String>,
    pub file: Option<String>,
    pub css_origin: Option<CssOrigin>,
    pub all_frames: Option<bool>,
    pub run_at: Option<String>,
}

// ─── windows ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetInfo {
    pub populate: Option<bool>,
    /// Defaults to `normal` and `popup`.
    pub window_types: Option<Vec<WindowType>>,
}

impl GetInfo {
    pub fn accepts(&self, window_type: WindowType) -> bool {
        match &self.window_types {
            Some(types) => types.contains(&window_type),
            None => matches!(window_type, WindowType::Normal | WindowType::Popup),
        }
    }

    pub fn populate(&self) -> bool {
        self.populate.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowCreateData {
    /// A single URL or a list of URLs.
    pub url: Option<Value>,
    pub tab_id: Option<TabId>,
    pub left: Option<i32>,
    pub top: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub focused: Option<bool>,
    #[serde(rename = "type")]
    pub window_type: Option<WindowType>,
    pub state: Option<WindowState>,
}

impl WindowCreateData {
    pub fn urls(&self) -> Vec<String> {
        match &self.url {
            Some(Value::String(url)) => vec![url.clone()],
            Some(Value::Array(urls)) => urls
                .iter()
                .filter_map(|url| url.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ─── cookies ────────────────────────────────────────────────────────────────

/// Identifies one cookie: `cookies.get` / `cookies.remove`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieDetails {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieFilter {
    pub url: Option<String>,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub session: Option<bool>,
    pub store_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCookieDetails {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub expiration_date: Option<f64>,
}

// ─── browserAction ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeTextDetails {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

/// A CSS color string or an `[r, g, b, a]` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Css(String),
    Rgba([u8; 4]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeColorDetails {
    pub color: ColorSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabSelector {
    pub tab_id: Option<TabId>,
}

// ─── storage ────────────────────────────────────────────────────────────────

/// One key or a list of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageKeys {
    One(String),
    Many(Vec<String>),
}

impl StorageKeys {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StorageOperation {
    Get {
        #[serde(default)]
        keys: Value,
    },
    Set {
        items: Map<String, Value>,
    },
    Remove {
        keys: StorageKeys,
    },
    Clear,
}

// ─── alarms ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmCreateInfo {
    /// Absolute fire time, milliseconds since the epoch.
    pub when: Option<f64>,
    pub delay_in_minutes: Option<f64>,
    pub period_in_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_info_default_types() {
        let info = GetInfo::default();
        assert!(info.accepts(WindowType::Normal));
        assert!(info.accepts(WindowType::Popup));
        assert!(!info.accepts(WindowType::Devtools));

        let info: GetInfo = serde_json::from_value(json!({"windowTypes": ["app"]})).unwrap();
        assert!(info.accepts(WindowType::App));
        assert!(!info.accepts(WindowType::Normal));
    }

    #[test]
    fn test_window_create_urls() {
        let single: WindowCreateData = serde_json::from_value(json!({"url": "https://a/"})).unwrap();
        assert_eq!(single.urls(), vec!["https://a/"]);

        let many: WindowCreateData =
            serde_json::from_value(json!({"url": ["https://a/", "https://b/"], "type": "popup"}))
                .unwrap();
        assert_eq!(many.urls().len(), 2);
        assert_eq!(many.window_type, Some(WindowType::Popup));
    }

    #[test]
    fn test_storage_operation_shapes() {
        let op: StorageOperation = serde_json::from_value(json!({"type": "get"})).unwrap();
        assert_eq!(op, StorageOperation::Get { keys: Value::Null });

        let op: StorageOperation =
            serde_json::from_value(json!({"type": "remove", "keys": "a"})).unwrap();
        assert_eq!(
            op,
            StorageOperation::Remove {
                keys: StorageKeys::One("a".into())
            }
        );

        let op: StorageOperation = serde_json::from_value(json!({"type": "clear"})).unwrap();
        assert_eq!(op, StorageOperation::Clear);
    }

    #[test]
    fn test_badge_color_accepts_both_forms() {
        let css: BadgeColorDetails = serde_json::from_value(json!({"color": "#ff0000"})).unwrap();
        assert_eq!(css.color, ColorSpec::Css("#ff0000".into()));

        let rgba: BadgeColorDetails =
            serde_json::from_value(json!({"color": [255, 0, 0, 255], "tabId": 4})).unwrap();
        assert_eq!(rgba.color, ColorSpec::Rgba([255, 0, 0, 255]));
        assert_eq!(rgba.tab_id, Some(4));
    }
}
