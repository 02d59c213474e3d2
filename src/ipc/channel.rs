//! Channel naming for the wire protocol.
//!
//! Requests travel on `api-<domain>-<operation>-<sessionId>`; replies on
//! `<request prefix>-<correlationId>`. Events pushed to listener contexts use
//! `api-emit-event-<domain>-<event>` and port traffic uses
//! `api-port-postMessage-<portId>`.

use super::correlator::is_correlation_id;

/// Numeric id of a session, assigned monotonically from 1.
pub type SessionId = u32;

pub const API_PREFIX: &str = "api-";
pub const EMIT_EVENT_PREFIX: &str = "api-emit-event-";
pub const PORT_MESSAGE_PREFIX: &str = "api-port-postMessage-";
pub const WEB_REQUEST_INTERCEPTED_PREFIX: &str = "api-webRequest-intercepted-";
pub const WEB_REQUEST_RESPONSE_PREFIX: &str = "api-webRequest-response-";
pub const RUNTIME_CONNECT: &str = "api-runtime-connect";
pub const RUNTIME_SEND_MESSAGE: &str = "api-runtime-sendMessage";
pub const RUNTIME_SEND_MESSAGE_RESPONSE: &str = "api-runtime-sendMessage-response";
pub const TABS_SEND_MESSAGE: &str = "api-tabs-sendMessage";
pub const BADGE_TEXT_BROADCAST: &str = "api-browserAction-setBadgeText";

/// Channel a request for `domain.operation` is sent on.
pub fn api_channel(domain: &str, operation: &str, session_id: SessionId) -> String {
    format!("{API_PREFIX}{domain}-{operation}-{session_id}")
}

/// Prefix shared by a request channel and its replies.
pub fn api_prefix(domain: &str, operation: &str) -> String {
    format!("{API_PREFIX}{domain}-{operation}")
}

/// Reply channel for a request identified by `correlation_id`.
pub fn reply_channel(prefix: &str, correlation_id: &str) -> String {
    format!("{prefix}-{correlation_id}")
}

/// Channel an event such as `tabs.onUpdated` is delivered on.
pub fn event_channel(event: &str) -> String {
    format!("{EMIT_EVENT_PREFIX}{}", event.replace('.', "-"))
}

/// Event name (`tabs.onUpdated`) carried by an event channel, if any.
pub fn event_name(channel: &str) -> Option<String> {
    let rest = channel.strip_prefix(EMIT_EVENT_PREFIX)?;
    let (domain, event) = rest.split_once('-')?;
    Some(format!("{domain}.{event}"))
}

pub fn port_channel(port_id: &str) -> String {
    format!("{PORT_MESSAGE_PREFIX}{port_id}")
}

/// Channel a blocking web-request listener is consulted on.
pub fn intercepted_channel(stage: &str, listener_id: &str) -> String {
    format!("{WEB_REQUEST_INTERCEPTED_PREFIX}{stage}-{listener_id}")
}

/// Prefix of the reply to an interception.
pub fn intercept_response_prefix(stage: &str, listener_id: &str) -> String {
    format!("{WEB_REQUEST_RESPONSE_PREFIX}{stage}-{listener_id}")
}

/// A parsed channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// A request addressed to the host for one session.
    Api {
        domain: &'a str,
        operation: &'a str,
        session_id: SessionId,
    },
    /// A reply to an earlier request.
    Reply {
        prefix: &'a str,
        correlation_id: &'a str,
    },
}

/// Split a channel name into its route.
///
/// Session ids are short decimal numbers while correlation ids are 32
/// alphanumerics, so the trailing segment alone decides which kind of
/// channel this is.
pub fn parse(channel: &str) -> Option<Route<'_>> {
    let (head, tail) = channel.rsplit_once('-')?;

    if is_correlation_id(tail) {
        return Some(Route::Reply {
            prefix: head,
            correlation_id: tail,
        });
    }

    if tail.is_empty() || tail.len() > 10 || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let session_id = tail.parse().ok()?;

    let body = head.strip_prefix(API_PREFIX)?;
    let (domain, operation) = body.split_once('-')?;
    if domain.is_empty() || operation.is_empty() {
        return None;
    }

    Some(Route::Api {
        domain,
        operation,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::correlator::new_correlation_id;

    #[test]
    fn test_api_channel_roundtrip() {
        let channel = api_channel("tabs", "query", 7);
        assert_eq!(channel, "api-tabs-query-7");
        assert_eq!(
            parse(&channel),
            Some(Route::Api {
                domain: "tabs",
                operation: "query",
                session_id: 7
            })
        );
    }

    #[test]
    fn test_operation_may_contain_dashes() {
        assert_eq!(
            parse("api-storage-operation-12"),
            Some(Route::Api {
                domain: "storage",
                operation: "operation",
                session_id: 12
            })
        );
        assert_eq!(
            parse("api-extensions-get-all-3"),
            Some(Route::Api {
                domain: "extensions",
                operation: "get-all",
                session_id: 3
            })
        );
    }

    #[test]
    fn test_reply_channel() {
        let id = new_correlation_id();
        let channel = reply_channel(&api_prefix("tabs", "create"), &id);
        assert_eq!(
            parse(&channel),
            Some(Route::Reply {
                prefix: "api-tabs-create",
                correlation_id: &id
            })
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("api-tabs-1"), None);
        assert_eq!(parse("api-tabs-query-abc"), None);
        assert_eq!(parse("tabs-query-1"), None);
    }

    #[test]
    fn test_event_channels() {
        let channel = event_channel("tabs.onActivated");
        assert_eq!(channel, "api-emit-event-tabs-onActivated");
        assert_eq!(event_name(&channel).as_deref(), Some("tabs.onActivated"));
        assert_eq!(event_name("api-tabs-query-1"), None);
    }
}
