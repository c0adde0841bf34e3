//! Inbound event types.
//!
//! The bridge delivers [`BridgeEvent`]s: a named event with an untyped JSON
//! payload. The dispatcher routes each one to a protocol and decodes the
//! payload into the typed [`HttpEvent`], [`WebSocketEvent`] or [`SseEvent`].
//!
//! # Example
//!
//! ```json
//! {
//!   "type": "response-start",
//!   "payload": {
//!     "id": "req-42",
//!     "statusCode": 200,
//!     "headers": {"content-type": "application/json"}
//!   },
//!   "timestamp": 1733911200000
//! }
//! ```

use crate::entry::{Direction, Headers, MessageType, Protocol, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A named event as delivered by the bridge.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeEvent {
    /// Event name used for routing (e.g. "request-start", "ws-message")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event-specific fields
    #[serde(default)]
    pub payload: Value,

    /// When the instrumented process observed the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl BridgeEvent {
    /// Create a new event with required fields
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: None,
        }
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Entry id carried in the payload, if any.
    pub fn entry_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStart {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStart {
    pub id: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBodyFilled {
    pub id: String,
    pub content_type: String,
    #[serde(default)]
    pub data: Option<String>,
    /// Echo of the token sent with the body request.
    #[serde(default)]
    pub token: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntryRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Failure {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionStart {
    pub id: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrame {
    pub id: String,
    pub direction: Direction,
    pub data: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebSocketClose {
    pub id: String,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseOpen {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub request_headers: Headers,
    #[serde(default)]
    pub response_headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SseFrame {
    pub id: String,
    #[serde(rename = "type", default = "default_sse_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub data: String,
}

fn default_sse_event_type() -> String {
    "message".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HttpEvent {
    #[serde(rename = "request-start")]
    RequestStart(RequestStart),
    #[serde(rename = "response-start")]
    ResponseStart(ResponseStart),
    #[serde(rename = "response-body")]
    ResponseBody(ResponseBodyFilled),
    #[serde(rename = "response-end")]
    ResponseEnd(EntryRef),
    #[serde(rename = "error")]
    Error(Failure),
}

impl HttpEvent {
    pub const KINDS: &'static [&'static str] = &[
        "request-start",
        "response-start",
        "response-body",
        "response-end",
        "error",
    ];

    pub fn id(&self) -> &str {
        match self {
            HttpEvent::RequestStart(e) => &e.id,
            HttpEvent::ResponseStart(e) => &e.id,
            HttpEvent::ResponseBody(e) => &e.id,
            HttpEvent::ResponseEnd(e) => &e.id,
            HttpEvent::Error(e) => &e.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WebSocketEvent {
    #[serde(rename = "ws-connecting")]
    Connecting(ConnectionStart),
    #[serde(rename = "ws-open")]
    Open(ConnectionStart),
    #[serde(rename = "ws-message")]
    Message(WebSocketFrame),
    #[serde(rename = "ws-close")]
    Close(WebSocketClose),
    #[serde(rename = "ws-error")]
    Error(Failure),
}

impl WebSocketEvent {
    pub const KINDS: &'static [&'static str] =
        &["ws-connecting", "ws-open", "ws-message", "ws-close", "ws-error"];

    pub fn id(&self) -> &str {
        match self {
            WebSocketEvent::Connecting(e) | WebSocketEvent::Open(e) => &e.id,
            WebSocketEvent::Message(e) => &e.id,
            WebSocketEvent::Close(e) => &e.id,
            WebSocketEvent::Error(e) => &e.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SseEvent {
    #[serde(rename = "sse-connecting")]
    Connecting(ConnectionStart),
    #[serde(rename = "sse-open")]
    Open(SseOpen),
    #[serde(rename = "sse-message")]
    Message(SseFrame),
    #[serde(rename = "sse-close")]
    Close(EntryRef),
    #[serde(rename = "sse-error")]
    Error(Failure),
}

impl SseEvent {
    pub const KINDS: &'static [&'static str] = &[
        "sse-connecting",
        "sse-open",
        "sse-message",
        "sse-close",
        "sse-error",
    ];

    pub fn id(&self) -> &str {
        match self {
            SseEvent::Connecting(e) => &e.id,
            SseEvent::Open(e) => &e.id,
            SseEvent::Message(e) => &e.id,
            SseEvent::Close(e) => &e.id,
            SseEvent::Error(e) => &e.id,
        }
    }
}

/// A decoded event, tagged by protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Http(HttpEvent),
    WebSocket(WebSocketEvent),
    Sse(SseEvent),
}

impl NetworkEvent {
    pub fn id(&self) -> &str {
        match self {
            NetworkEvent::Http(event) => event.id(),
            NetworkEvent::WebSocket(event) => event.id(),
            NetworkEvent::Sse(event) => event.id(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            NetworkEvent::Http(_) => Protocol::Http,
            NetworkEvent::WebSocket(_) => Protocol::WebSocket,
            NetworkEvent::Sse(_) => Protocol::Sse,
        }
    }
}

/// Event names the engine understands for a protocol.
pub fn known_kinds(protocol: Protocol) -> &'static [&'static str] {
    match protocol {
        Protocol::Http => HttpEvent::KINDS,
        Protocol::WebSocket => WebSocketEvent::KINDS,
        Protocol::Sse => SseEvent::KINDS,
    }
}
