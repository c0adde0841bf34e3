//! Network entry data model.
//!
//! A [`NetworkEntry`] is one logical request or connection. It is a tagged
//! union over the three observed protocols; code that consumes entries
//! matches on it exhaustively.
//!
//! Each protocol carries its own lifecycle status:
//!
//! ```text
//! HTTP:       Pending ──▶ HeadersReceived ──▶ Complete
//!                │               │
//!                └───────────────┴──────────▶ Failed
//!
//! WS / SSE:   Connecting ──▶ Open ──▶ Closed
//!                 │            │
//!                 └────────────┴─────▶ Error
//! ```

use crate::buffer::MessageBuffer;
use crate::buffer::MessageId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Ordered header mapping as delivered by the bridge.
pub type Headers = IndexMap<String, HeaderValue>;

/// A header carrying either one value or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            HeaderValue::Single(value) => std::slice::from_ref(value),
            HeaderValue::Multiple(values) => values,
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Single(value.to_string())
    }
}

/// All values of every header whose name matches `name` case-insensitively,
/// in header order.
pub fn header_values<'a>(headers: &'a Headers, name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
        .flat_map(|(_, value)| value.values())
}

/// Protocol discriminator, also used as the filter type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    Sse,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Http, Protocol::WebSocket, Protocol::Sse];

    /// Short label used by the entry list.
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Http => "XHR",
            Protocol::WebSocket => "WS",
            Protocol::Sse => "SSE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::WebSocket => "websocket",
            Protocol::Sse => "sse",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle ordering shared by the protocol status enums.
pub trait Lifecycle: Copy + PartialEq {
    /// Terminal statuses never change again.
    fn is_terminal(self) -> bool;

    /// Whether moving from `self` to `next` is a forward transition.
    fn can_advance_to(self, next: Self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HttpStatus {
    Pending,
    HeadersReceived,
    Complete,
    Failed,
}

impl Lifecycle for HttpStatus {
    fn is_terminal(self) -> bool {
        matches!(self, HttpStatus::Complete | HttpStatus::Failed)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use HttpStatus::*;
        matches!(
            (self, next),
            (Pending, HeadersReceived)
                | (HeadersReceived, Complete)
                | (Pending, Failed)
                | (HeadersReceived, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Error,
}

impl Lifecycle for ConnectionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Closed | ConnectionStatus::Error)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closed)
                | (Connecting, Error)
                | (Open, Error)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub method: String,
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub content_type: String,
    /// `None` when the instrumented process had no body to return.
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Headers,
    /// Absent until explicitly requested and fulfilled.
    pub body: Option<ResponseBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEntry {
    pub id: String,
    pub url: String,
    pub start_time: Timestamp,
    pub status: HttpStatus,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub end_time: Option<Timestamp>,
    pub error: Option<String>,
}

impl HttpEntry {
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end.saturating_sub(self.start_time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketMessage {
    pub id: MessageId,
    pub direction: Direction,
    pub data: String,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketEntry {
    pub id: String,
    pub url: String,
    pub start_time: Timestamp,
    pub status: ConnectionStatus,
    pub messages: MessageBuffer<WebSocketMessage>,
    pub closed_at: Option<Timestamp>,
    pub close_code: Option<u16>,
    pub close_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseMessage {
    pub id: MessageId,
    /// Event name, `message` when the server did not name it.
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEntry {
    pub id: String,
    pub url: String,
    pub start_time: Timestamp,
    pub status: ConnectionStatus,
    pub request_headers: Headers,
    pub response_headers: Headers,
    pub messages: MessageBuffer<SseMessage>,
    pub closed_at: Option<Timestamp>,
    pub error: Option<String>,
}

/// One tracked request or connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum NetworkEntry {
    Http(HttpEntry),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketEntry),
    Sse(SseEntry),
}

impl NetworkEntry {
    pub fn id(&self) -> &str {
        match self {
            NetworkEntry::Http(entry) => &entry.id,
            NetworkEntry::WebSocket(entry) => &entry.id,
            NetworkEntry::Sse(entry) => &entry.id,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkEntry::Http(entry) => &entry.url,
            NetworkEntry::WebSocket(entry) => &entry.url,
            NetworkEntry::Sse(entry) => &entry.url,
        }
    }

    pub fn start_time(&self) -> Timestamp {
        match self {
            NetworkEntry::Http(entry) => entry.start_time,
            NetworkEntry::WebSocket(entry) => entry.start_time,
            NetworkEntry::Sse(entry) => entry.start_time,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            NetworkEntry::Http(_) => Protocol::Http,
            NetworkEntry::WebSocket(_) => Protocol::WebSocket,
            NetworkEntry::Sse(_) => Protocol::Sse,
        }
    }

    /// HTTP method; connections report `GET`, the method of their handshake.
    /// Text filters ignore it for connections.
    pub fn method(&self) -> &str {
        match self {
            NetworkEntry::Http(entry) => &entry.request.method,
            NetworkEntry::WebSocket(_) | NetworkEntry::Sse(_) => "GET",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            NetworkEntry::Http(entry) => entry.status.is_terminal(),
            NetworkEntry::WebSocket(entry) => entry.status.is_terminal(),
            NetworkEntry::Sse(entry) => entry.status.is_terminal(),
        }
    }

    /// Human-readable status for list rows.
    pub fn status_text(&self) -> String {
        match self {
            NetworkEntry::Http(entry) => match (&entry.status, &entry.response) {
                (HttpStatus::Pending, _) => "pending".to_string(),
                (HttpStatus::Failed, _) => "failed".to_string(),
                (_, Some(response)) => response.status_code.to_string(),
                (_, None) => "unknown".to_string(),
            },
            NetworkEntry::WebSocket(WebSocketEntry { status, .. })
            | NetworkEntry::Sse(SseEntry { status, .. }) => match status {
                ConnectionStatus::Connecting => "connecting",
                ConnectionStatus::Open => "open",
                ConnectionStatus::Closed => "closed",
                ConnectionStatus::Error => "error",
            }
            .to_string(),
        }
    }

    pub fn as_http(&self) -> Option<&HttpEntry> {
        match self {
            NetworkEntry::Http(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_websocket(&self) -> Option<&WebSocketEntry> {
        match self {
            NetworkEntry::WebSocket(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_sse(&self) -> Option<&SseEntry> {
        match self {
            NetworkEntry::Sse(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Bridges between the sum type and one of its variants, so the store can
/// run a reducer against the concrete entry type it expects.
pub trait EntryVariant: Sized {
    const PROTOCOL: Protocol;

    fn variant_mut(entry: &mut NetworkEntry) -> Option<&mut Self>;

    fn into_entry(self) -> NetworkEntry;
}

impl EntryVariant for HttpEntry {
    const PROTOCOL: Protocol = Protocol::Http;

    fn variant_mut(entry: &mut NetworkEntry) -> Option<&mut Self> {
        match entry {
            NetworkEntry::Http(inner) => Some(inner),
            _ => None,
        }
    }

    fn into_entry(self) -> NetworkEntry {
        NetworkEntry::Http(self)
    }
}

impl EntryVariant for WebSocketEntry {
    const PROTOCOL: Protocol = Protocol::WebSocket;

    fn variant_mut(entry: &mut NetworkEntry) -> Option<&mut Self> {
        match entry {
            NetworkEntry::WebSocket(inner) => Some(inner),
            _ => None,
        }
    }

    fn into_entry(self) -> NetworkEntry {
        NetworkEntry::WebSocket(self)
    }
}

impl EntryVariant for SseEntry {
    const PROTOCOL: Protocol = Protocol::Sse;

    fn variant_mut(entry: &mut NetworkEntry) -> Option<&mut Self> {
        match entry {
            NetworkEntry::Sse(inner) => Some(inner),
            _ => None,
        }
    }

    fn into_entry(self) -> NetworkEntry {
        NetworkEntry::Sse(self)
    }
}
