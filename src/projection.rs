//! Read-side projections for the panel.
//!
//! Everything here is derived from a published snapshot and recomputed per
//! query: summary rows for the entry list, message rows for WebSocket and
//! SSE histories, selected-message handles, and response body views.

use crate::buffer::{MessageBuffer, MessageId};
use crate::entry::{
    Direction, HttpEntry, MessageType, NetworkEntry, ResponseBody, SseMessage, Timestamp,
    WebSocketMessage,
};
use crate::store::StoreSnapshot;
use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

/// Default number of characters shown in a message preview
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

const BINARY_PLACEHOLDER: &str = "Binary message";

/// Format a millisecond timestamp as `HH:MM:SS.mmm` (UTC).
pub fn format_timestamp(timestamp: Timestamp) -> String {
    match DateTime::from_timestamp_millis(timestamp) {
        Some(time) => time.format("%H:%M:%S%.3f").to_string(),
        None => "--:--:--.---".to_string(),
    }
}

/// Truncate `data` to `chars` characters, marking the cut with `...`.
pub fn preview(data: &str, chars: usize) -> String {
    match data.char_indices().nth(chars) {
        Some((cut, _)) => format!("{}...", &data[..cut]),
        None => data.to_string(),
    }
}

/// Summary row for the entry list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRow {
    pub id: String,
    pub label: &'static str,
    pub method: String,
    pub url: String,
    pub status: String,
    pub started: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl EntryRow {
    pub fn of(entry: &NetworkEntry) -> Self {
        let duration_ms = match entry {
            NetworkEntry::Http(http) => http.duration_ms(),
            NetworkEntry::WebSocket(ws) => ws.closed_at.map(|end| end.saturating_sub(ws.start_time)),
            NetworkEntry::Sse(sse) => sse.closed_at.map(|end| end.saturating_sub(sse.start_time)),
        };

        Self {
            id: entry.id().to_string(),
            label: entry.protocol().label(),
            method: entry.method().to_string(),
            url: entry.url().to_string(),
            status: entry.status_text(),
            started: format_timestamp(entry.start_time()),
            duration_ms,
        }
    }
}

/// Message history of a connection entry.
#[derive(Debug, Clone, Copy)]
pub enum Messages<'a> {
    WebSocket(&'a MessageBuffer<WebSocketMessage>),
    Sse(&'a MessageBuffer<SseMessage>),
}

/// One message from either kind of history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageRef<'a> {
    WebSocket(&'a WebSocketMessage),
    Sse(&'a SseMessage),
}

impl<'a> MessageRef<'a> {
    pub fn id(&self) -> MessageId {
        match self {
            MessageRef::WebSocket(message) => message.id,
            MessageRef::Sse(message) => message.id,
        }
    }

    pub fn data(&self) -> &'a str {
        match self {
            MessageRef::WebSocket(message) => &message.data,
            MessageRef::Sse(message) => &message.data,
        }
    }

    /// Full message body for the detail pane: pretty JSON when the data
    /// parses, the raw text otherwise.
    pub fn detail(&self) -> String {
        if let MessageRef::WebSocket(message) = self {
            if message.message_type == MessageType::Binary {
                return BINARY_PLACEHOLDER.to_string();
            }
        }

        let data = self.data();
        serde_json::from_str::<Value>(data)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| data.to_string())
    }
}

/// One row of a message table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: MessageId,
    /// Only WebSocket messages have a direction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// `text`/`binary` for WebSocket frames, the event name for SSE.
    pub kind: String,
    pub preview: String,
    pub time: String,
}

impl MessageRow {
    pub fn of(message: MessageRef<'_>, preview_chars: usize) -> Self {
        match message {
            MessageRef::WebSocket(message) => Self {
                id: message.id,
                direction: Some(message.direction),
                kind: match message.message_type {
                    MessageType::Text => "text".to_string(),
                    MessageType::Binary => "binary".to_string(),
                },
                preview: match message.message_type {
                    MessageType::Text => preview(&message.data, preview_chars),
                    MessageType::Binary => BINARY_PLACEHOLDER.to_string(),
                },
                time: format_timestamp(message.timestamp),
            },
            MessageRef::Sse(message) => Self {
                id: message.id,
                direction: None,
                kind: message.event_type.clone(),
                preview: preview(&message.data, preview_chars),
                time: format_timestamp(message.timestamp),
            },
        }
    }
}

impl<'a> Messages<'a> {
    /// History of `entry`, `None` for HTTP entries.
    pub fn of(entry: &'a NetworkEntry) -> Option<Self> {
        match entry {
            NetworkEntry::Http(_) => None,
            NetworkEntry::WebSocket(ws) => Some(Messages::WebSocket(&ws.messages)),
            NetworkEntry::Sse(sse) => Some(Messages::Sse(&sse.messages)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Messages::WebSocket(buffer) => buffer.len(),
            Messages::Sse(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        match self {
            Messages::WebSocket(buffer) => buffer.evicted(),
            Messages::Sse(buffer) => buffer.evicted(),
        }
    }

    pub fn get(&self, id: MessageId) -> Option<MessageRef<'a>> {
        match self {
            Messages::WebSocket(buffer) => buffer.get(id).map(MessageRef::WebSocket),
            Messages::Sse(buffer) => buffer.get(id).map(MessageRef::Sse),
        }
    }

    /// Messages oldest first.
    pub fn iter(&self) -> Box<dyn Iterator<Item = MessageRef<'a>> + 'a> {
        match *self {
            Messages::WebSocket(buffer) => Box::new(buffer.iter().map(MessageRef::WebSocket)),
            Messages::Sse(buffer) => Box::new(buffer.iter().map(MessageRef::Sse)),
        }
    }

    pub fn rows(&self, preview_chars: usize) -> Vec<MessageRow> {
        self.iter()
            .map(|message| MessageRow::of(message, preview_chars))
            .collect()
    }
}

/// A selected message, resolved against whatever snapshot is current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageSelection {
    pub entry_id: String,
    pub message_id: MessageId,
}

impl MessageSelection {
    pub fn new(entry_id: impl Into<String>, message_id: MessageId) -> Self {
        Self {
            entry_id: entry_id.into(),
            message_id,
        }
    }

    /// The selected message, or `None` once it was evicted or the entry is
    /// gone.
    pub fn resolve<'a>(&self, snapshot: &'a StoreSnapshot) -> Option<MessageRef<'a>> {
        snapshot.messages(&self.entry_id)?.get(self.message_id)
    }
}

/// How a response body should be shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BodyView {
    /// No body was fetched, or the process had none
    Unavailable,
    Json {
        content_type: String,
        value: Value,
    },
    /// Declared JSON that did not parse
    RawJson {
        content_type: String,
        text: String,
    },
    Text {
        content_type: String,
        text: String,
    },
    Binary {
        content_type: String,
        bytes: usize,
    },
}

impl BodyView {
    pub fn of(body: Option<&ResponseBody>) -> Self {
        let Some(ResponseBody {
            content_type,
            data: Some(data),
        }) = body
        else {
            return BodyView::Unavailable;
        };

        let media_type = media_type(content_type);
        let content_type = content_type.clone();

        if media_type == "application/json" {
            return match serde_json::from_str(data) {
                Ok(value) => BodyView::Json {
                    content_type,
                    value,
                },
                Err(_) => BodyView::RawJson {
                    content_type,
                    text: data.clone(),
                },
            };
        }

        if media_type.starts_with("text/")
            || media_type == "application/xml"
            || media_type == "application/javascript"
        {
            return BodyView::Text {
                content_type,
                text: data.clone(),
            };
        }

        BodyView::Binary {
            content_type,
            bytes: data.len(),
        }
    }

    /// View of an HTTP entry's response body.
    pub fn of_entry(entry: &HttpEntry) -> Self {
        Self::of(entry.response.as_ref().and_then(|r| r.body.as_ref()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            BodyView::Unavailable => "-",
            BodyView::Json { .. } => "json",
            BodyView::RawJson { .. } => "raw-json",
            BodyView::Text { .. } => "text",
            BodyView::Binary { .. } => "binary",
        }
    }
}

/// `type/subtype` without parameters, lowercased.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
