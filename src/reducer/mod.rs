//! Per-protocol reducers.
//!
//! A reducer applies one decoded event to the entry it names, as a state
//! transition run through [`EntryStore::upsert`]. Reducers never block and
//! never fail on odd event orderings: they recover locally (marking the
//! entry failed, or leaving it untouched) and report what they noticed as a
//! [`Note`] so the engine can log and record it.
//!
//! ## Reducers
//!
//! - [`http`]: request/response lifecycle
//! - [`websocket`]: connection lifecycle plus the sent/received history
//! - [`sse`]: connection lifecycle plus the server event history

pub mod http;
pub mod sse;
pub mod websocket;

use crate::anomaly::AnomalyKind;
use crate::entry::{Lifecycle, Timestamp};
use crate::event::NetworkEvent;
use crate::store::{EntryStore, StoreError, Upsert};

/// Inputs shared by all reducers for one event.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext {
    /// Event time: the bridge timestamp, or the engine clock when absent
    pub now: Timestamp,

    /// Message history size for new WebSocket entries
    pub websocket_capacity: usize,

    /// Message history size for new SSE entries
    pub sse_capacity: usize,
}

/// Something unexpected a reducer recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub kind: AnomalyKind,
    pub detail: String,
}

impl Note {
    pub fn new(kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Whether the event created the entry
    pub upsert: Upsert,

    /// Whether the lifecycle status moved
    pub status_changed: bool,

    /// What the reducer recovered from, if anything
    pub note: Option<Note>,
}

impl Applied {
    fn new(upsert: Upsert) -> Self {
        Self {
            upsert,
            status_changed: false,
            note: None,
        }
    }

    fn noted(mut self, kind: AnomalyKind, detail: impl Into<String>) -> Self {
        // Keep the first note; it is the root cause.
        if self.note.is_none() {
            self.note = Some(Note::new(kind, detail));
        }
        self
    }

    pub fn is_created(&self) -> bool {
        self.upsert == Upsert::Created
    }
}

/// Move `status` to `next` if that is a forward transition.
///
/// Returns whether the status changed. Terminal statuses are sticky.
fn advance<S: Lifecycle>(status: &mut S, next: S) -> bool {
    if status.can_advance_to(next) {
        *status = next;
        true
    } else {
        false
    }
}

/// Route a decoded event to its protocol reducer.
pub fn reduce(
    store: &mut EntryStore,
    event: NetworkEvent,
    ctx: &ReduceContext,
) -> Result<Applied, StoreError> {
    match event {
        NetworkEvent::Http(event) => http::reduce(store, event, ctx),
        NetworkEvent::WebSocket(event) => websocket::reduce(store, event, ctx),
        NetworkEvent::Sse(event) => sse::reduce(store, event, ctx),
    }
}
