//! Anomaly log for events the engine recovered from.
//!
//! Nothing the bridge sends is fatal. When an event is unknown, malformed,
//! out of order or stale, the engine recovers locally and records what
//! happened here so the panel can show why an entry looks the way it does.
//! The log is bounded; older records are dropped first.
//!
//! # Example
//!
//! ```rust,ignore
//! use netlens::anomaly::{AnomalyKind, AnomalyLog};
//!
//! let mut log = AnomalyLog::new(1000);
//! log.record(AnomalyKind::UnknownEventType, "ws-ping", None, "no route", now);
//!
//! for anomaly in log.recent(10) {
//!     println!("{}: {}", anomaly.kind, anomaly.detail);
//! }
//! ```

use crate::buffer::{MessageBuffer, MessageId};
use crate::entry::Timestamp;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Default number of anomalies kept
pub const DEFAULT_ANOMALY_CAPACITY: usize = 1000;

/// Category of a recovered problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    /// No route or reducer for the event name
    UnknownEventType,
    /// The payload could not be decoded
    MalformedPayload,
    /// The event named an id that was never started
    UnknownEntry,
    /// The event arrived before the one it depends on
    OutOfOrder,
    /// A creating event repeated for a tracked id
    Duplicate,
    /// The event arrived after the entry reached a terminal state
    LateEvent,
    /// The id is tracked under a different protocol
    ProtocolMismatch,
    /// A body response arrived with no matching outstanding request
    StaleCorrelation,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::UnknownEventType => "unknown-event-type",
            AnomalyKind::MalformedPayload => "malformed-payload",
            AnomalyKind::UnknownEntry => "unknown-entry",
            AnomalyKind::OutOfOrder => "out-of-order",
            AnomalyKind::Duplicate => "duplicate",
            AnomalyKind::LateEvent => "late-event",
            AnomalyKind::ProtocolMismatch => "protocol-mismatch",
            AnomalyKind::StaleCorrelation => "stale-correlation",
        }
    }

    /// Expected races are logged quietly; the rest are warnings.
    fn is_expected(self) -> bool {
        matches!(self, AnomalyKind::LateEvent | AnomalyKind::StaleCorrelation)
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub id: MessageId,
    pub kind: AnomalyKind,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub detail: String,
    pub at: Timestamp,
}

/// Bounded record of anomalies, newest last.
#[derive(Debug, Clone)]
pub struct AnomalyLog {
    records: MessageBuffer<Anomaly>,
}

impl AnomalyLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: MessageBuffer::new(capacity),
        }
    }

    /// Log and store an anomaly.
    pub fn record(
        &mut self,
        kind: AnomalyKind,
        event_type: &str,
        entry_id: Option<&str>,
        detail: impl Into<String>,
        at: Timestamp,
    ) -> MessageId {
        let detail = detail.into();

        if kind.is_expected() {
            debug!(
                kind = %kind,
                event_type = %event_type,
                entry_id = ?entry_id,
                detail = %detail,
                "Recovered from network event anomaly"
            );
        } else {
            warn!(
                kind = %kind,
                event_type = %event_type,
                entry_id = ?entry_id,
                detail = %detail,
                "Recovered from network event anomaly"
            );
        }

        let (id, _) = self.records.push_with(|id| Anomaly {
            id,
            kind,
            event_type: event_type.to_string(),
            entry_id: entry_id.map(str::to_string),
            detail,
            at,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total recorded since creation, including dropped records.
    pub fn total(&self) -> u64 {
        self.records.total_appended()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anomaly> {
        self.records.iter()
    }

    /// Up to `limit` most recent anomalies, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&Anomaly> {
        self.records.iter().rev().take(limit).collect()
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.records.iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for AnomalyLog {
    fn default() -> Self {
        Self::new(DEFAULT_ANOMALY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_recent() {
        let mut log = AnomalyLog::new(10);
        log.record(AnomalyKind::UnknownEventType, "ws-ping", None, "no route", 1);
        log.record(AnomalyKind::UnknownEntry, "response-end", Some("3"), "never started", 2);

        let recent = log.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AnomalyKind::UnknownEntry);
        assert_eq!(recent[0].entry_id.as_deref(), Some("3"));
        assert_eq!(recent[1].event_type, "ws-ping");
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = AnomalyLog::new(2);
        for i in 0..5 {
            log.record(AnomalyKind::LateEvent, "ws-close", None, "late", i);
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.total(), 5);
        assert_eq!(log.iter().map(|a| a.at).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_count_by_kind() {
        let mut log = AnomalyLog::default();
        log.record(AnomalyKind::Duplicate, "ws-open", Some("a"), "dup", 0);
        log.record(AnomalyKind::Duplicate, "ws-open", Some("b"), "dup", 0);
        log.record(AnomalyKind::MalformedPayload, "ws-open", None, "bad", 0);

        assert_eq!(log.count(AnomalyKind::Duplicate), 2);
        assert_eq!(log.count(AnomalyKind::StaleCorrelation), 0);
    }

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&AnomalyKind::StaleCorrelation).unwrap();
        assert_eq!(json, "\"staleCorrelation\"");
        assert_eq!(AnomalyKind::StaleCorrelation.to_string(), "stale-correlation");
    }
}
