//! Error types for crxbridge
//!
//! Provides standardized error handling across the bridge. Query-style API
//! calls never surface these to extension code; they are reserved for
//! load-time failures and for the plumbing between host and renderer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while brokering extension APIs.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Given path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Given directory doesn't contain manifest.json: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest in {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Session {0} not found")]
    SessionNotFound(u32),

    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Malformed payload on '{channel}': {message}")]
    MalformedPayload { channel: String, message: String },

    /// The receiving handle is gone or refused the message.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No reply for '{0}' within the configured timeout")]
    ReplyTimeout(String),

    /// The pending request was discarded before a reply arrived.
    #[error("Reply for '{0}' was dropped")]
    ReplyDropped(String),

    /// The embedding application does not implement this operation.
    #[error("Operation '{0}' is not supported by the host")]
    Unsupported(&'static str),

    #[error("Storage error for extension '{extension}': {message}")]
    Storage { extension: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl BridgeError {
    pub(crate) fn malformed(channel: &str, message: impl ToString) -> Self {
        Self::MalformedPayload {
            channel: channel.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
