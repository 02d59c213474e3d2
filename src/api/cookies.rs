//! `chrome.cookies` over the session's cookie store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BridgeResult;
use crate::events::EventBus;
use crate::ipc::types::{CookieDetails, CookieFilter, SetCookieDetails};
use crate::session::Session;

/// A cookie as the host engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
}

/// A cookie in the shape extensions expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
    pub session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    pub store_id: String,
}

impl From<Cookie> for ExtensionCookie {
    fn from(cookie: Cookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            host_only: cookie.host_only,
            path: cookie.path,
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site: "no_restriction".to_string(),
            session: cookie.session,
            expiration_date: cookie.expiration_date,
            store_id: "0".to_string(),
        }
    }
}

/// Why the engine changed a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CookieChangeCause {
    Explicit,
    Overwrite,
    Expired,
    Evicted,
    ExpiredOverwrite,
}

impl CookieChangeCause {
    /// Name used by `cookies.onChanged`.
    pub fn as_extension_cause(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Overwrite => "overwrite",
            Self::Expired => "expired",
            Self::Evicted => "evicted",
            Self::ExpiredOverwrite => "expired_overwrite",
        }
    }
}

/// The engine's cookie jar for one partition.
#[async_trait]
pub trait CookieStore: Send + Sync {
    async fn get(&self, filter: &CookieFilter) -> BridgeResult<Vec<Cookie>>;
    async fn set(&self, details: &SetCookieDetails) -> BridgeResult<()>;
    async fn remove(&self, url: &str, name: &str) -> BridgeResult<()>;
}

pub struct CookiesApi {
    bus: Arc<EventBus>,
}

impl CookiesApi {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// First cookie matching url and name, or `None`.
    pub async fn get(&self, session: &Session, details: &CookieDetails) -> Option<ExtensionCookie> {
        let store = session.cookie_store()?;
        let filter = CookieFilter {
            url: Some(details.url.clone()),
            name: Some(details.name.clone()),
            ..Default::default()
        };

        match store.get(&filter).await {
            Ok(cookies) => cookies.into_iter().next().map(ExtensionCookie::from),
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "cookie lookup failed");
                None
            }
        }
    }

    pub async fn get_all(&self, session: &Session, filter: &CookieFilter) -> Vec<ExtensionCookie> {
        let Some(store) = session.cookie_store() else {
            return Vec::new();
        };

        match store.get(filter).await {
            Ok(cookies) => cookies.into_iter().map(ExtensionCookie::from).collect(),
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "cookie listing failed");
                Vec::new()
            }
        }
    }

    /// Set a cookie and echo the written fields back.
    pub async fn set(&self, session: &Session, details: &SetCookieDetails) -> Value {
        let Some(store) = session.cookie_store() else {
            return Value::Null;
        };

        if let Err(e) = store.set(details).await {
            tracing::warn!(session_id = session.id(), url = %details.url, error = %e, "cookie write failed");
            return Value::Null;
        }

        json!({
            "name": details.name,
            "value": details.value,
            "domain": details.domain,
            "path": details.path,
            "secure": details.secure,
            "httpOnly": details.http_only,
            "expirationDate": details.expiration_date,
            "storeId": Value::Null,
        })
    }

    pub async fn remove(&self, session: &Session, details: &CookieDetails) -> Value {
        let Some(store) = session.cookie_store() else {
            return Value::Null;
        };

        if let Err(e) = store.remove(&details.url, &details.name).await {
            tracing::warn!(session_id = session.id(), url = %details.url, error = %e, "cookie removal failed");
            return Value::Null;
        }

        json!({"url": details.url, "name": details.name, "storeId": Value::Null})
    }

    /// Forward an engine cookie change to the session's extensions.
    pub fn changed(&self, session: &Session, cookie: Cookie, cause: CookieChangeCause, removed: bool) {
        let details = json!({
            "cookie": ExtensionCookie::from(cookie),
            "cause": cause.as_extension_cause(),
            "removed": removed,
        });
        self.bus
            .broadcast_in_session(session.id(), "cookies.onChanged", vec![details]);
    }
}
