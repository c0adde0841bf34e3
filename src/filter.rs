//! Entry filtering.
//!
//! A [`FilterSpec`] selects entries by protocol and by a free-text needle
//! matched case-insensitively against the url, and for HTTP entries also the
//! method. Connections have no method of their own. Filtering is pure
//! and recomputed on every query; the entry counts a panel deals with do not
//! warrant an index.

use crate::entry::{NetworkEntry, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub text: String,

    #[serde(default = "all_protocols")]
    pub types: BTreeSet<Protocol>,
}

fn all_protocols() -> BTreeSet<Protocol> {
    Protocol::ALL.into_iter().collect()
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            types: all_protocols(),
        }
    }
}

impl FilterSpec {
    pub fn new(text: impl Into<String>, types: impl IntoIterator<Item = Protocol>) -> Self {
        Self {
            text: text.into(),
            types: types.into_iter().collect(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Add the protocol if absent, remove it if present.
    pub fn toggle(&mut self, protocol: Protocol) {
        if !self.types.remove(&protocol) {
            self.types.insert(protocol);
        }
    }

    /// Back to matching everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True when the filter hides anything at all.
    pub fn is_active(&self) -> bool {
        !self.text.is_empty() || self.types.len() < Protocol::ALL.len()
    }

    pub fn matches(&self, entry: &NetworkEntry) -> bool {
        if !self.types.contains(&entry.protocol()) {
            return false;
        }
        if self.text.is_empty() {
            return true;
        }

        let needle = self.text.to_lowercase();
        entry.url().to_lowercase().contains(&needle)
            || entry
                .as_http()
                .is_some_and(|http| http.request.method.to_lowercase().contains(&needle))
    }

    /// The matching subset, order preserved.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<&'a NetworkEntry>
    where
        I: IntoIterator<Item = &'a NetworkEntry>,
    {
        entries.into_iter().filter(|entry| self.matches(entry)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::entry::{
        ConnectionStatus, Headers, HttpEntry, HttpRequest, HttpStatus, SseEntry, WebSocketEntry,
    };

    fn http(id: &str, method: &str, url: &str) -> NetworkEntry {
        NetworkEntry::Http(HttpEntry {
            id: id.to_string(),
            url: url.to_string(),
            start_time: 0,
            status: HttpStatus::Pending,
            request: HttpRequest {
                method: method.to_string(),
                headers: Headers::new(),
                body: None,
            },
            response: None,
            end_time: None,
            error: None,
        })
    }

    fn websocket(id: &str, url: &str) -> NetworkEntry {
        NetworkEntry::WebSocket(WebSocketEntry {
            id: id.to_string(),
            url: url.to_string(),
            start_time: 0,
            status: ConnectionStatus::Open,
            messages: MessageBuffer::new(8),
            closed_at: None,
            close_code: None,
            close_reason: None,
            error: None,
        })
    }

    fn sse(id: &str, url: &str) -> NetworkEntry {
        NetworkEntry::Sse(SseEntry {
            id: id.to_string(),
            url: url.to_string(),
            start_time: 0,
            status: ConnectionStatus::Open,
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            messages: MessageBuffer::new(8),
            closed_at: None,
            error: None,
        })
    }

    fn sample() -> Vec<NetworkEntry> {
        vec![
            http("1", "GET", "https://api.example.com/users"),
            websocket("2", "wss://chat.example.com/socket"),
            http("3", "POST", "https://api.example.com/login"),
            sse("4", "https://api.example.com/events"),
        ]
    }

    fn ids(entries: Vec<&NetworkEntry>) -> Vec<&str> {
        entries.into_iter().map(NetworkEntry::id).collect()
    }

    #[test]
    fn test_default_matches_everything() {
        let entries = sample();
        let filter = FilterSpec::default();
        assert!(!filter.is_active());
        assert_eq!(ids(filter.apply(&entries)), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_type_filter_keeps_insertion_order() {
        let entries = sample();
        let filter = FilterSpec::new("", [Protocol::Http]);
        assert!(filter.is_active());
        assert_eq!(ids(filter.apply(&entries)), vec!["1", "3"]);
    }

    #[test]
    fn test_text_matches_url_case_insensitive() {
        let entries = sample();
        let filter = FilterSpec::default().with_text("CHAT");
        assert_eq!(ids(filter.apply(&entries)), vec!["2"]);
    }

    #[test]
    fn test_text_matches_method() {
        let entries = sample();
        let filter = FilterSpec::default().with_text("post");
        assert_eq!(ids(filter.apply(&entries)), vec!["3"]);
    }

    #[test]
    fn test_method_text_skips_connections() {
        let entries = sample();
        let filter = FilterSpec::default().with_text("get");
        assert_eq!(ids(filter.apply(&entries)), vec!["1"]);
    }

    #[test]
    fn test_text_and_types_combine() {
        let entries = sample();
        let filter = FilterSpec::new("example", [Protocol::Sse, Protocol::WebSocket]);
        assert_eq!(ids(filter.apply(&entries)), vec!["2", "4"]);
    }

    #[test]
    fn test_empty_types_hides_everything() {
        let entries = sample();
        let filter = FilterSpec::new("", []);
        assert!(filter.apply(&entries).is_empty());
    }

    #[test]
    fn test_toggle_and_clear() {
        let mut filter = FilterSpec::default();
        filter.toggle(Protocol::WebSocket);
        assert!(!filter.types.contains(&Protocol::WebSocket));
        filter.toggle(Protocol::WebSocket);
        assert!(filter.types.contains(&Protocol::WebSocket));

        filter.text = "abc".to_string();
        filter.toggle(Protocol::Sse);
        filter.clear();
        assert_eq!(filter, FilterSpec::default());
    }

    #[test]
    fn test_deserialize_defaults_to_all_types() {
        let filter: FilterSpec = serde_json::from_str(r#"{"text": "api"}"#).unwrap();
        assert_eq!(filter.types.len(), 3);
        assert_eq!(filter.text, "api");
    }
}
