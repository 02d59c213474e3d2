//! `chrome-extension://` resource resolution.
//!
//! `<scheme>://<extensionId>/<path>` maps to the extension's background
//! document when `<path>` names it, and otherwise to a file beneath the
//! extension's install directory.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::session::Session;

/// What the protocol handler answers for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    Document { mime_type: &'static str, data: Vec<u8> },
    NotFound,
}

impl ProtocolResponse {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Document { .. })
    }
}

/// Build `<scheme>://<id>/<path>`.
pub fn extension_url(scheme: &str, extension_id: &str, path: &str) -> String {
    format!("{scheme}://{extension_id}/{}", path.trim_start_matches('/'))
}

/// Resolve `url` against the extensions loaded in `session`.
pub async fn resolve(session: &Session, scheme: &str, url: &str) -> ProtocolResponse {
    let Some((extension_id, relative)) = split_url(scheme, url) else {
        tracing::debug!(url, "not an extension url");
        return ProtocolResponse::NotFound;
    };

    let Some(extension) = session.extension(&extension_id) else {
        tracing::debug!(session_id = session.id(), extension_id = %extension_id, "unknown extension");
        return ProtocolResponse::NotFound;
    };

    if let Some(background) = extension.background() {
        if relative == Path::new(&background.file_name) {
            return ProtocolResponse::Document {
                mime_type: "text/html",
                data: background.html.clone(),
            };
        }
    }

    let path = extension.path.join(&relative);
    match tokio::fs::read(&path).await {
        Ok(data) => ProtocolResponse::Document {
            mime_type: mime_type_for(&path),
            data,
        },
        Err(e) => {
            tracing::debug!(extension_id = %extension.id, path = %path.display(), error = %e, "resource not found");
            ProtocolResponse::NotFound
        }
    }
}

/// `(extension id, relative path)` for a URL of `scheme`. Paths that
/// would leave the install directory are refused.
fn split_url(scheme: &str, url: &str) -> Option<(String, PathBuf)> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != scheme {
        return None;
    }
    let extension_id = parsed.host_str().filter(|host| !host.is_empty())?.to_string();

    let decoded = urlencoding::decode(parsed.path()).ok()?;
    let relative = PathBuf::from(decoded.trim_start_matches('/'));

    let contained = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !contained || relative.as_os_str().is_empty() {
        return None;
    }

    Some((extension_id, relative))
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("js" | "mjs") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
