//! Event Dispatcher - routes bridge events to protocol reducers.
//!
//! The [`Dispatcher`] maps each [`BridgeEvent`]'s name to a [`Protocol`]
//! using exact names and prefix patterns, decodes the payload into that
//! protocol's typed event, and hands it to the matching reducer.
//!
//! # Pattern Matching
//!
//! ```text
//! Pattern      | Matches
//! -------------|-----------------------------------------------
//! error        | error (exact only)
//! request-*    | request-start
//! response-*   | response-start, response-body, response-end
//! ws-*         | ws-connecting, ws-open, ws-message, ws-close, ...
//! sse-*        | sse-connecting, sse-open, sse-message, ...
//! ```
//!
//! # Matching Priority
//!
//! 1. Exact routes are checked first
//! 2. Patterns are checked in registration order
//! 3. Unrouted events are reported as unknown, never as failures
//!
//! An event that routes to a protocol but is not one of that protocol's
//! known kinds (say `ws-ping` from a newer runtime) is also unknown: the
//! engine ignores it instead of guessing.

use crate::entry::Protocol;
use crate::event::{known_kinds, BridgeEvent, NetworkEvent};
use crate::reducer::{self, Applied, ReduceContext};
use crate::store::{EntryStore, StoreError};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur while decoding a bridge event.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// No route, or not a kind the routed protocol knows
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    /// The payload is not a JSON object
    #[error("payload of '{event_type}' is not an object")]
    NotAnObject { event_type: String },

    /// The payload is missing fields or has the wrong shape
    #[error("malformed '{event_type}' payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A prefix pattern and the protocol it routes to
#[derive(Debug, Clone)]
struct PatternRoute {
    pattern: String,
    protocol: Protocol,
}

/// Routes and decodes bridge events.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Routes registered for exact event names
    exact_routes: HashMap<String, Protocol>,

    /// Prefix routes (in registration order)
    pattern_routes: Vec<PatternRoute>,
}

impl Dispatcher {
    /// Create a dispatcher with no routes.
    pub fn new() -> Self {
        Self {
            exact_routes: HashMap::new(),
            pattern_routes: Vec::new(),
        }
    }

    /// Create a dispatcher with the standard event taxonomy routed.
    pub fn with_default_routes() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.on("error", Protocol::Http);
        dispatcher.on("request-*", Protocol::Http);
        dispatcher.on("response-*", Protocol::Http);
        dispatcher.on("ws-*", Protocol::WebSocket);
        dispatcher.on("sse-*", Protocol::Sse);
        dispatcher
    }

    /// Register a route for an exact event name or a `prefix-*` pattern.
    ///
    /// Re-registering a pattern replaces its protocol.
    pub fn on(&mut self, pattern: &str, protocol: Protocol) {
        debug!(pattern = %pattern, protocol = %protocol, "Registering event route");

        if is_wildcard_pattern(pattern) {
            if let Some(route) = self
                .pattern_routes
                .iter_mut()
                .find(|route| route.pattern == pattern)
            {
                route.protocol = protocol;
            } else {
                self.pattern_routes.push(PatternRoute {
                    pattern: pattern.to_string(),
                    protocol,
                });
            }
        } else {
            self.exact_routes.insert(pattern.to_string(), protocol);
        }
    }

    /// Number of registered routes (exact + pattern).
    pub fn route_count(&self) -> usize {
        self.exact_routes.len() + self.pattern_routes.len()
    }

    /// Protocol an event name routes to.
    pub fn route(&self, event_type: &str) -> Option<Protocol> {
        if let Some(protocol) = self.exact_routes.get(event_type) {
            return Some(*protocol);
        }

        self.pattern_routes
            .iter()
            .find(|route| matches_pattern(event_type, &route.pattern))
            .map(|route| route.protocol)
    }

    /// Decode a bridge event into its typed form.
    pub fn decode(&self, event: &BridgeEvent) -> Result<NetworkEvent, DecodeError> {
        let event_type = event.event_type.as_str();
        let unknown = || DecodeError::UnknownEventType(event_type.to_string());

        let protocol = self.route(event_type).ok_or_else(unknown)?;
        if !known_kinds(protocol).contains(&event_type) {
            return Err(unknown());
        }

        let payload = match &event.payload {
            Value::Object(_) => event.payload.clone(),
            Value::Null => Value::Object(serde_json::Map::new()),
            _ => {
                return Err(DecodeError::NotAnObject {
                    event_type: event_type.to_string(),
                })
            }
        };
        // Adjacent tagging keeps payload fields named `type` intact.
        let value = json!({ "type": event_type, "payload": payload });

        let decoded = match protocol {
            Protocol::Http => serde_json::from_value(value).map(NetworkEvent::Http),
            Protocol::WebSocket => serde_json::from_value(value).map(NetworkEvent::WebSocket),
            Protocol::Sse => serde_json::from_value(value).map(NetworkEvent::Sse),
        };

        decoded.map_err(|source| DecodeError::Malformed {
            event_type: event_type.to_string(),
            source,
        })
    }

    /// Apply a decoded event to the store through its protocol reducer.
    pub fn apply(
        &self,
        store: &mut EntryStore,
        event: NetworkEvent,
        ctx: &ReduceContext,
    ) -> Result<Applied, StoreError> {
        trace!(
            protocol = %event.protocol(),
            entry_id = %event.id(),
            "Applying event"
        );
        reducer::reduce(store, event, ctx)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_default_routes()
    }
}

/// Check if a pattern is a wildcard pattern (contains `*`).
fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Check if an event name matches a pattern.
///
/// - `"error"` - exact match only
/// - `"ws-*"` - matches any event whose first `-` segment is `ws`
/// - `"*"` - matches everything
fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    if pattern == event_type || pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("-*") {
        if let Some((event_prefix, rest)) = event_type.split_once('-') {
            return event_prefix == prefix && !rest.is_empty();
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{HttpEvent, SseEvent, WebSocketEvent};

    // Pattern matching tests

    #[test]
    fn test_matches_pattern_exact() {
        assert!(matches_pattern("error", "error"));
        assert!(!matches_pattern("ws-error", "error"));
    }

    #[test]
    fn test_matches_pattern_prefix() {
        assert!(matches_pattern("ws-open", "ws-*"));
        assert!(matches_pattern("ws-message", "ws-*"));
        assert!(!matches_pattern("sse-open", "ws-*"));
        assert!(!matches_pattern("wss-open", "ws-*"));
        assert!(!matches_pattern("ws-", "ws-*"));
        assert!(!matches_pattern("ws", "ws-*"));
    }

    #[test]
    fn test_matches_pattern_catch_all() {
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("", "*"));
    }

    #[test]
    fn test_is_wildcard_pattern() {
        assert!(is_wildcard_pattern("ws-*"));
        assert!(is_wildcard_pattern("*"));
        assert!(!is_wildcard_pattern("error"));
    }

    // Routing tests

    #[test]
    fn test_default_routes() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.route_count(), 5);
        assert_eq!(dispatcher.route("request-start"), Some(Protocol::Http));
        assert_eq!(dispatcher.route("response-body"), Some(Protocol::Http));
        assert_eq!(dispatcher.route("error"), Some(Protocol::Http));
        assert_eq!(dispatcher.route("ws-close"), Some(Protocol::WebSocket));
        assert_eq!(dispatcher.route("sse-message"), Some(Protocol::Sse));
        assert_eq!(dispatcher.route("grpc-call"), None);
    }

    #[test]
    fn test_reregistering_pattern_replaces() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.on("ws-*", Protocol::Sse);
        dispatcher.on("ws-*", Protocol::WebSocket);
        assert_eq!(dispatcher.route_count(), 1);
        assert_eq!(dispatcher.route("ws-open"), Some(Protocol::WebSocket));
    }

    // Decoding tests

    #[test]
    fn test_decode_http() {
        let dispatcher = Dispatcher::default();
        let event = BridgeEvent::new(
            "request-start",
            json!({"id": "1", "url": "/a", "method": "POST", "body": "{}"}),
        );

        match dispatcher.decode(&event).unwrap() {
            NetworkEvent::Http(HttpEvent::RequestStart(start)) => {
                assert_eq!(start.url, "/a");
                assert_eq!(start.body.as_deref(), Some("{}"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_websocket_and_sse() {
        let dispatcher = Dispatcher::default();

        let ws = BridgeEvent::new("ws-close", json!({"id": "2", "code": 1006}));
        assert!(matches!(
            dispatcher.decode(&ws).unwrap(),
            NetworkEvent::WebSocket(WebSocketEvent::Close(_))
        ));

        let sse = BridgeEvent::new("sse-close", json!({"id": "3"}));
        assert!(matches!(
            dispatcher.decode(&sse).unwrap(),
            NetworkEvent::Sse(SseEvent::Close(_))
        ));

        let named = BridgeEvent::new("sse-message", json!({"id": "3", "type": "tick", "data": "1"}));
        match dispatcher.decode(&named).unwrap() {
            NetworkEvent::Sse(SseEvent::Message(frame)) => assert_eq!(frame.event_type, "tick"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_event_types() {
        let dispatcher = Dispatcher::default();

        let unrouted = BridgeEvent::new("grpc-call", json!({"id": "1"}));
        assert!(matches!(
            dispatcher.decode(&unrouted),
            Err(DecodeError::UnknownEventType(t)) if t == "grpc-call"
        ));

        let future_kind = BridgeEvent::new("ws-ping", json!({"id": "1"}));
        assert!(matches!(
            dispatcher.decode(&future_kind),
            Err(DecodeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_decode_malformed_payloads() {
        let dispatcher = Dispatcher::default();

        let missing_field = BridgeEvent::new("response-start", json!({"id": "1"}));
        assert!(matches!(
            dispatcher.decode(&missing_field),
            Err(DecodeError::Malformed { .. })
        ));

        let not_object = BridgeEvent::new("response-end", json!(["1"]));
        assert!(matches!(
            dispatcher.decode(&not_object),
            Err(DecodeError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_apply_routes_to_reducer() {
        let dispatcher = Dispatcher::default();
        let mut store = EntryStore::new();
        let ctx = ReduceContext {
            now: 1,
            websocket_capacity: 4,
            sse_capacity: 4,
        };

        let event = dispatcher
            .decode(&BridgeEvent::new("ws-open", json!({"id": "w", "url": "wss://x"})))
            .unwrap();
        let applied = dispatcher.apply(&mut store, event, &ctx).unwrap();

        assert!(applied.is_created());
        assert_eq!(store.get("w").map(|e| e.protocol()), Some(Protocol::WebSocket));
    }
}
