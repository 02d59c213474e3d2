//! Typed request messages.
//!
//! Every request carried on an `api-<domain>-<operation>-<sessionId>`
//! channel decodes into one [`ApiRequest`] variant. The variant must agree
//! with the channel it arrived on; the host checks that through
//! [`ApiRequest::route`] before dispatching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::correlator::CorrelationId;
use super::types::{
    AlarmCreateInfo, BadgeColorDetails, BadgeTextDetails, CookieDetails, CookieFilter,
    CreateProperties, GetInfo, InjectDetails, ReloadProperties, SetCookieDetails,
    StorageOperation, TabSelector, UpdateProperties, WindowCreateData,
};
use crate::contents::{TabId, WindowId};
use crate::identity::QueryInfo;
use crate::storage::StorageAreaName;
use crate::web_request::{RequestFilter, Stage};

/// Outer frame of every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Present when the caller waits for a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<CorrelationId>,
    /// Extension the calling context belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    pub request: ApiRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all_fields = "camelCase")]
pub enum ApiRequest {
    // tabs
    #[serde(rename = "tabs.get")]
    TabsGet { tab_id: TabId },
    #[serde(rename = "tabs.getCurrent")]
    TabsGetCurrent,
    #[serde(rename = "tabs.query")]
    TabsQuery {
        #[serde(default)]
        query: QueryInfo,
    },
    #[serde(rename = "tabs.update")]
    TabsUpdate {
        #[serde(default)]
        tab_id: Option<TabId>,
        #[serde(default)]
        props: UpdateProperties,
    },
    #[serde(rename = "tabs.reload")]
    TabsReload {
        #[serde(default)]
        tab_id: Option<TabId>,
        #[serde(default)]
        props: ReloadProperties,
    },
    #[serde(rename = "tabs.create")]
    TabsCreate {
        #[serde(default)]
        props: CreateProperties,
    },
    #[serde(rename = "tabs.insertCSS")]
    TabsInsertCss {
        #[serde(default)]
        tab_id: Option<TabId>,
        details: InjectDetails,
    },
    #[serde(rename = "tabs.executeScript")]
    TabsExecuteScript {
        #[serde(default)]
        tab_id: Option<TabId>,
        details: InjectDetails,
    },
    #[serde(rename = "tabs.sendMessage")]
    TabsSendMessage {
        tab_id: TabId,
        message: Value,
        /// Lets the tab answer through the `runtime.sendMessage` relay.
        #[serde(default)]
        response_id: Option<CorrelationId>,
    },

    // windows
    #[serde(rename = "windows.get")]
    WindowsGet {
        window_id: WindowId,
        #[serde(default)]
        info: GetInfo,
    },
    #[serde(rename = "windows.getCurrent")]
    WindowsGetCurrent {
        #[serde(default)]
        info: GetInfo,
    },
    #[serde(rename = "windows.getLastFocused")]
    WindowsGetLastFocused {
        #[serde(default)]
        info: GetInfo,
    },
    #[serde(rename = "windows.getAll")]
    WindowsGetAll {
        #[serde(default)]
        info: GetInfo,
    },
    #[serde(rename = "windows.create")]
    WindowsCreate {
        #[serde(default)]
        data: WindowCreateData,
    },

    // cookies
    #[serde(rename = "cookies.get")]
    CookiesGet { details: CookieDetails },
    #[serde(rename = "cookies.getAll")]
    CookiesGetAll {
        #[serde(default)]
        details: CookieFilter,
    },
    #[serde(rename = "cookies.set")]
    CookiesSet { details: SetCookieDetails },
    #[serde(rename = "cookies.remove")]
    CookiesRemove { details: CookieDetails },

    // browserAction
    #[serde(rename = "browserAction.setBadgeText")]
    SetBadgeText { details: BadgeTextDetails },
    #[serde(rename = "browserAction.getBadgeText")]
    GetBadgeText {
        #[serde(default)]
        details: TabSelector,
    },
    #[serde(rename = "browserAction.setBadgeBackgroundColor")]
    SetBadgeBackgroundColor { details: BadgeColorDetails },
    #[serde(rename = "browserAction.getBadgeBackgroundColor")]
    GetBadgeBackgroundColor {
        #[serde(default)]
        details: TabSelector,
    },
    /// Sent by the browser UI when the user clicks an action button.
    #[serde(rename = "browserAction.click")]
    BrowserActionClick {
        extension_id: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },

    // storage
    #[serde(rename = "storage.operation")]
    Storage {
        area: StorageAreaName,
        operation: StorageOperation,
    },

    // runtime
    #[serde(rename = "runtime.sendMessage")]
    RuntimeSendMessage {
        #[serde(default)]
        extension_id: Option<String>,
        message: Value,
        #[serde(default)]
        response_id: Option<CorrelationId>,
    },
    #[serde(rename = "runtime.connect")]
    RuntimeConnect {
        port_id: String,
        #[serde(default)]
        extension_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "runtime.reload")]
    RuntimeReload,

    // ports
    #[serde(rename = "port.postMessage")]
    PortPostMessage { port_id: String, message: Value },
    #[serde(rename = "port.disconnect")]
    PortDisconnect { port_id: String },

    // alarms
    #[serde(rename = "alarms.create")]
    AlarmsCreate {
        #[serde(default)]
        name: String,
        #[serde(default)]
        info: AlarmCreateInfo,
    },
    #[serde(rename = "alarms.get")]
    AlarmsGet {
        #[serde(default)]
        name: String,
    },
    #[serde(rename = "alarms.getAll")]
    AlarmsGetAll,
    #[serde(rename = "alarms.clear")]
    AlarmsClear {
        #[serde(default)]
        name: String,
    },
    #[serde(rename = "alarms.clearAll")]
    AlarmsClearAll,

    // webRequest
    #[serde(rename = "webRequest.addListener")]
    WebRequestAddListener {
        listener_id: String,
        event: Stage,
        #[serde(default)]
        filter: RequestFilter,
    },
    #[serde(rename = "webRequest.removeListener")]
    WebRequestRemoveListener { listener_id: String },

    // extension metadata and raw fanout
    #[serde(rename = "extensions.get")]
    ExtensionsGet { extension_id: String },
    #[serde(rename = "extensions.getAll")]
    ExtensionsGetAll,
    #[serde(rename = "extensions.broadcast")]
    ExtensionsBroadcast {
        channel: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl ApiRequest {
    /// `(domain, operation)` of the channel this request travels on.
    pub fn route(&self) -> (&'static str, &'static str) {
        match self {
            Self::TabsGet { .. } => ("tabs", "get"),
            Self::TabsGetCurrent => ("tabs", "getCurrent"),
            Self::TabsQuery { .. } => ("tabs", "query"),
            Self::TabsUpdate { .. } => ("tabs", "update"),
            Self::TabsReload { .. } => ("tabs", "reload"),
            Self::TabsCreate { .. } => ("tabs", "create"),
            Self::TabsInsertCss { .. } => ("tabs", "insertCSS"),
            Self::TabsExecuteScript { .. } => ("tabs", "executeScript"),
            Self::TabsSendMessage { .. } => ("tabs", "sendMessage"),
            Self::WindowsGet { .. } => ("windows", "get"),
            Self::WindowsGetCurrent { .. } => ("windows", "getCurrent"),
            Self::WindowsGetLastFocused { .. } => ("windows", "getLastFocused"),
            Self::WindowsGetAll { .. } => ("windows", "getAll"),
            Self::WindowsCreate { .. } => ("windows", "create"),
            Self::CookiesGet { .. } => ("cookies", "get"),
            Self::CookiesGetAll { .. } => ("cookies", "getAll"),
            Self::CookiesSet { .. } => ("cookies", "set"),
            Self::CookiesRemove { .. } => ("cookies", "remove"),
            Self::SetBadgeText { .. } => ("browserAction", "setBadgeText"),
            Self::GetBadgeText { .. } => ("browserAction", "getBadgeText"),
            Self::SetBadgeBackgroundColor { .. } => ("browserAction", "setBadgeBackgroundColor"),
            Self::GetBadgeBackgroundColor { .. } => ("browserAction", "getBadgeBackgroundColor"),
            Self::BrowserActionClick { .. } => ("browserAction", "click"),
            Self::Storage { .. } => ("storage", "operation"),
            Self::RuntimeSendMessage { .. } => ("runtime", "sendMessage"),
            Self::RuntimeConnect { .. } => ("runtime", "connect"),
            Self::RuntimeReload => ("runtime", "reload"),
            Self::PortPostMessage { .. } => ("port", "postMessage"),
            Self::PortDisconnect { .. } => ("port", "disconnect"),
            Self::AlarmsCreate { .. } => ("alarms", "create"),
            Self::AlarmsGet { .. } => ("alarms", "get"),
            Self::AlarmsGetAll => ("alarms", "getAll"),
            Self::AlarmsClear { .. } => ("alarms", "clear"),
            Self::AlarmsClearAll => ("alarms", "clearAll"),
            Self::WebRequestAddListener { .. } => ("webRequest", "addListener"),
            Self::WebRequestRemoveListener { .. } => ("webRequest", "removeListener"),
            Self::ExtensionsGet { .. } => ("extensions", "get"),
            Self::ExtensionsGetAll => ("extensions", "getAll"),
            Self::ExtensionsBroadcast { .. } => ("extensions", "broadcast"),
        }
    }
}
