//! Request snapshots, filters and listener decisions.

use serde::{Deserialize, Serialize};

use crate::contents::{TabId, TAB_ID_NONE};
use crate::url_pattern::{matches_any, UrlPattern};

/// Lifecycle stages a listener can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    OnBeforeRequest,
    OnBeforeSendHeaders,
    OnSendHeaders,
    OnHeadersReceived,
    OnResponseStarted,
    OnBeforeRedirect,
    OnCompleted,
    OnErrorOccurred,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Self::OnBeforeRequest,
        Self::OnBeforeSendHeaders,
        Self::OnSendHeaders,
        Self::OnHeadersReceived,
        Self::OnResponseStarted,
        Self::OnBeforeRedirect,
        Self::OnCompleted,
        Self::OnErrorOccurred,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnBeforeRequest => "onBeforeRequest",
            Self::OnBeforeSendHeaders => "onBeforeSendHeaders",
            Self::OnSendHeaders => "onSendHeaders",
            Self::OnHeadersReceived => "onHeadersReceived",
            Self::OnResponseStarted => "onResponseStarted",
            Self::OnBeforeRedirect => "onBeforeRedirect",
            Self::OnCompleted => "onCompleted",
            Self::OnErrorOccurred => "onErrorOccurred",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }

    /// Stages whose listeners may cancel, redirect or rewrite headers. The
    /// network layer waits for these.
    pub fn can_mutate(self) -> bool {
        matches!(
            self,
            Self::OnBeforeRequest | Self::OnBeforeSendHeaders | Self::OnHeadersReceived
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of an in-flight request handed to listeners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub frame_id: i64,
    #[serde(default = "no_frame")]
    pub parent_frame_id: i64,
    /// Extension resource type (`main_frame`, `script`, ...).
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub time_stamp: f64,
    #[serde(default = "no_tab")]
    pub tab_id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn no_frame() -> i64 {
    -1
}

fn no_tab() -> TabId {
    TAB_ID_NONE
}

/// Map engine resource type names (`mainFrame`) to extension ones
/// (`main_frame`).
pub fn normalize_resource_type(engine_type: &str) -> String {
    match engine_type {
        "mainFrame" => "main_frame".to_string(),
        "subFrame" => "sub_frame".to_string(),
        "cspReport" => "csp_report".to_string(),
        "stylesheet" | "script" | "image" | "font" | "object" | "xhr" | "ping" | "media"
        | "websocket" => engine_type.to_string(),
        _ => "other".to_string(),
    }
}

/// Listener filter as sent by the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestFilter {
    pub urls: Vec<String>,
    pub types: Option<Vec<String>>,
    pub tab_id: Option<TabId>,
}

impl RequestFilter {
    pub fn compile(&self) -> CompiledFilter {
        CompiledFilter {
            urls: self.urls.iter().map(|url| UrlPattern::parse(url)).collect(),
            types: self.types.clone(),
            tab_id: self.tab_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    urls: Vec<UrlPattern>,
    types: Option<Vec<String>>,
    tab_id: Option<TabId>,
}

impl CompiledFilter {
    /// No URLs means all URLs.
    pub fn matches(&self, details: &RequestDetails) -> bool {
        if !matches_any(&self.urls, &details.url) {
            return false;
        }
        if let Some(types) = &self.types {
            if !types.iter().any(|t| *t == details.resource_type) {
                return false;
            }
        }
        self.tab_id.map_or(true, |tab_id| tab_id == details.tab_id)
    }
}

/// What a blocking listener answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
}

impl BlockingResponse {
    pub fn cancel() -> Self {
        Self {
            cancel: Some(true),
            ..Default::default()
        }
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            redirect_url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// A listener's answer, reduced to what `stage` allows.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoOp,
    Cancel,
    Redirect(String),
    RequestHeaders(Vec<HttpHeader>),
    ResponseHeaders(Vec<HttpHeader>),
}

impl Decision {
    /// Decisions for one reply. Cancel wins over everything else in the
    /// same reply; fields a stage cannot change are ignored.
    pub fn from_response(stage: Stage, response: BlockingResponse) -> Vec<Decision> {
        if !stage.can_mutate() {
            return vec![Decision::NoOp];
        }
        if response.cancel == Some(true) {
            return vec![Decision::Cancel];
        }

        let mut decisions = Vec::new();
        if let Some(url) = response.redirect_url.filter(|url| !url.is_empty()) {
            if matches!(stage, Stage::OnBeforeRequest | Stage::OnHeadersReceived) {
                decisions.push(Decision::Redirect(url));
            }
        }
        if let Some(headers) = response.request_headers {
            if stage == Stage::OnBeforeSendHeaders {
                decisions.push(Decision::RequestHeaders(headers));
            }
        }
        if let Some(headers) = response.response_headers {
            if stage == Stage::OnHeadersReceived {
                decisions.push(Decision::ResponseHeaders(headers));
            }
        }

        if decisions.is_empty() {
            decisions.push(Decision::NoOp);
        }
        decisions
    }
}

/// The single effective result of one stage for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptOutcome {
    pub cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
}

impl InterceptOutcome {
    pub fn is_passthrough(&self) -> bool {
        *self == Self::default()
    }

    /// Layer one decision on top of the running outcome.
    pub(crate) fn apply(&mut self, decision: Decision, original: &RequestDetails) {
        match decision {
            Decision::NoOp => {}
            Decision::Cancel => self.cancel = true,
            Decision::Redirect(url) => self.redirect_url = Some(url),
            Decision::RequestHeaders(headers) => self.request_headers = Some(headers),
            Decision::ResponseHeaders(headers) => {
                let base = self
                    .response_headers
                    .take()
                    .or_else(|| original.response_headers.clone())
                    .unwrap_or_default();
                self.response_headers = Some(merge_headers(base, headers));
            }
        }
    }
}

/// Overlay `updates` onto `base` by case-insensitive header name. Every
/// base header sharing a name with an update is replaced.
pub fn merge_headers(base: Vec<HttpHeader>, updates: Vec<HttpHeader>) -> Vec<HttpHeader> {
    let mut merged: Vec<HttpHeader> = base
        .into_iter()
        .filter(|header| {
            !updates
                .iter()
                .any(|update| update.name.eq_ignore_ascii_case(&header.name))
        })
        .collect();
    merged.extend(updates);
    merged
}
