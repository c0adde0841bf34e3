//! The network activity engine.
//!
//! [`Engine`] consumes bridge events one at a time, in delivery order, and
//! keeps the entry store current. It owns everything mutable: the store, the
//! table of outstanding body requests, the anomaly log and the command sink.
//! Nothing an event does is fatal; [`Engine::handle`] always returns a
//! [`DispatchResult`] describing what happened.
//!
//! Readers on other tasks hold an [`EngineReader`]. After every applied
//! event the engine publishes a fresh [`StoreSnapshot`], so a reader always
//! sees a consistent version of the store.
//!
//! ```text
//! BridgeEvent -> Dispatcher::decode -> (body correlation) -> reducer -> publish
//!                      |                       |                |
//!                      +------- AnomalyLog <---+----------------+
//! ```

use crate::anomaly::{AnomalyKind, AnomalyLog};
use crate::commands::{Command, CommandError, CommandSink};
use crate::config::EngineConfig;
use crate::cookies::EntryCookies;
use crate::correlation::{BodyRequest, Mismatch, PendingBodies};
use crate::dispatcher::{DecodeError, Dispatcher};
use crate::entry::{NetworkEntry, Protocol, Timestamp};
use crate::event::{BridgeEvent, HttpEvent, NetworkEvent};
use crate::filter::FilterSpec;
use crate::projection::{BodyView, EntryRow, MessageRow, MessageSelection, Messages};
use crate::reducer::ReduceContext;
use crate::store::{EntryStore, SessionId, StoreSnapshot};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no entry with id '{0}'")]
    UnknownEntry(String),

    #[error("entry '{id}' is {protocol}, not http")]
    NotHttp { id: String, protocol: Protocol },

    #[error("entry '{0}' has no response yet")]
    NoResponse(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event reached its reducer
    Applied {
        created: bool,
        status_changed: bool,
    },
    /// The event was dropped
    Ignored,
}

/// Result of handling one bridge event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Event name as received
    pub event_type: String,

    /// Entry the event named, when it could be read
    pub entry_id: Option<String>,

    pub outcome: Outcome,

    /// Anomaly recorded while handling the event
    pub anomaly: Option<AnomalyKind>,
}

impl DispatchResult {
    /// Returns true if the event reached its reducer
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, Outcome::Applied { .. })
    }

    /// Returns true if nothing unexpected happened
    pub fn is_clean(&self) -> bool {
        self.anomaly.is_none()
    }
}

/// Running totals since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCounters {
    pub events_handled: u64,
    pub events_applied: u64,
    pub events_ignored: u64,
    pub anomalies: u64,
    pub bodies_requested: u64,
    pub resets: u64,
}

/// Read handle onto the engine's published snapshots.
///
/// Cheap to clone and safe to use from any task.
#[derive(Debug, Clone)]
pub struct EngineReader {
    published: Arc<ArcSwap<StoreSnapshot>>,
}

impl EngineReader {
    /// The most recently published snapshot.
    pub fn load(&self) -> Arc<StoreSnapshot> {
        self.published.load_full()
    }

    /// Summary rows for the entries visible under `filter`.
    pub fn rows(&self, filter: Option<&FilterSpec>) -> Vec<EntryRow> {
        self.load()
            .entries(filter)
            .into_iter()
            .map(EntryRow::of)
            .collect()
    }

    /// Message rows of a WebSocket or SSE entry, oldest first.
    pub fn message_rows(&self, id: &str, preview_chars: usize) -> Option<Vec<MessageRow>> {
        self.load().messages(id).map(|messages| messages.rows(preview_chars))
    }

    /// Response body view of an HTTP entry.
    pub fn body(&self, id: &str) -> Option<BodyView> {
        self.load()
            .entry(id)
            .and_then(NetworkEntry::as_http)
            .map(BodyView::of_entry)
    }

    /// Detail text of a selected message, `None` once it was evicted.
    pub fn message_detail(&self, selection: &MessageSelection) -> Option<String> {
        selection.resolve(&self.load()).map(|message| message.detail())
    }

    /// Cookie view of an HTTP or SSE entry.
    pub fn cookies(&self, id: &str) -> Option<EntryCookies> {
        self.load().entry(id).and_then(EntryCookies::of)
    }
}

/// The engine. See the module docs.
pub struct Engine {
    store: EntryStore,
    dispatcher: Dispatcher,
    pending: PendingBodies,
    anomalies: AnomalyLog,
    sink: Box<dyn CommandSink>,
    websocket_capacity: usize,
    sse_capacity: usize,
    session: SessionId,
    version: u64,
    published: Arc<ArcSwap<StoreSnapshot>>,
    counters: EngineCounters,
}

impl Engine {
    pub fn new(config: &EngineConfig, sink: Box<dyn CommandSink>) -> Self {
        let session = SessionId::new();

        info!(
            session = %session.0,
            sink = %sink.name(),
            websocket_capacity = config.buffers.websocket_capacity,
            sse_capacity = config.buffers.sse_capacity,
            "Engine created"
        );

        Self {
            store: EntryStore::new(),
            dispatcher: Dispatcher::default(),
            pending: PendingBodies::new(session)
                .with_required_tokens(config.correlation.require_token),
            anomalies: AnomalyLog::new(config.anomalies.capacity),
            sink,
            websocket_capacity: config.buffers.websocket_capacity,
            sse_capacity: config.buffers.sse_capacity,
            session,
            version: 0,
            published: Arc::new(ArcSwap::from_pointee(StoreSnapshot::empty(session))),
            counters: EngineCounters::default(),
        }
    }

    /// Handle one inbound bridge event.
    pub fn handle(&mut self, event: BridgeEvent) -> DispatchResult {
        self.counters.events_handled += 1;
        let now = event.timestamp.unwrap_or_else(clock);

        debug!(
            event_type = %event.event_type,
            entry_id = ?event.entry_id(),
            "Handling event"
        );

        let decoded = match self.dispatcher.decode(&event) {
            Ok(decoded) => decoded,
            Err(err) => {
                let kind = match err {
                    DecodeError::UnknownEventType(_) => AnomalyKind::UnknownEventType,
                    DecodeError::NotAnObject { .. } | DecodeError::Malformed { .. } => {
                        AnomalyKind::MalformedPayload
                    }
                };
                let entry_id = event.entry_id().map(str::to_string);
                return self.ignore(event.event_type, entry_id, kind, err.to_string(), now);
            }
        };

        let entry_id = decoded.id().to_string();

        if let NetworkEvent::Http(HttpEvent::ResponseBody(body)) = &decoded {
            if let Err(mismatch) = self.pending.resolve(&body.id, body.token) {
                let detail = match mismatch {
                    Mismatch::NotRequested => "no body request outstanding in this session",
                    Mismatch::TokenMismatch => "token does not match the outstanding request",
                    Mismatch::TokenMissing => "body carries no token and tokens are required",
                };
                return self.ignore(
                    event.event_type,
                    Some(entry_id),
                    AnomalyKind::StaleCorrelation,
                    detail.to_string(),
                    now,
                );
            }
        }

        let ctx = ReduceContext {
            now,
            websocket_capacity: self.websocket_capacity,
            sse_capacity: self.sse_capacity,
        };

        match self.dispatcher.apply(&mut self.store, decoded, &ctx) {
            Ok(applied) => {
                self.counters.events_applied += 1;
                let anomaly = applied.note.as_ref().map(|note| note.kind);
                let created = applied.is_created();
                let status_changed = applied.status_changed;
                if let Some(note) = applied.note {
                    self.counters.anomalies += 1;
                    self.anomalies
                        .record(note.kind, &event.event_type, Some(&entry_id), note.detail, now);
                }
                self.publish();

                DispatchResult {
                    event_type: event.event_type,
                    entry_id: Some(entry_id),
                    outcome: Outcome::Applied {
                        created,
                        status_changed,
                    },
                    anomaly,
                }
            }
            Err(err) => self.ignore(
                event.event_type,
                Some(entry_id),
                AnomalyKind::ProtocolMismatch,
                err.to_string(),
                now,
            ),
        }
    }

    fn ignore(
        &mut self,
        event_type: String,
        entry_id: Option<String>,
        kind: AnomalyKind,
        detail: String,
        now: Timestamp,
    ) -> DispatchResult {
        self.counters.events_ignored += 1;
        self.counters.anomalies += 1;
        self.anomalies
            .record(kind, &event_type, entry_id.as_deref(), detail, now);

        DispatchResult {
            event_type,
            entry_id,
            outcome: Outcome::Ignored,
            anomaly: Some(kind),
        }
    }

    /// Ask the instrumented process for the response body of HTTP entry `id`.
    ///
    /// The body arrives later as a `response-body` event. Asking again while a
    /// request is outstanding returns the outstanding request without sending
    /// another command.
    pub fn request_response_body(&mut self, id: &str) -> Result<BodyRequest, EngineError> {
        let entry = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::UnknownEntry(id.to_string()))?;
        let http = entry.as_http().ok_or_else(|| EngineError::NotHttp {
            id: id.to_string(),
            protocol: entry.protocol(),
        })?;
        if http.response.is_none() {
            return Err(EngineError::NoResponse(id.to_string()));
        }

        let (request, fresh) = self.pending.begin(id);
        if !fresh {
            debug!(entry_id = %id, token = %request.token, "Body request already outstanding");
            return Ok(request);
        }

        let command = Command::RequestResponseBody {
            id: id.to_string(),
            token: request.token,
        };
        if let Err(err) = self.sink.send(command) {
            self.pending.cancel(id);
            return Err(err.into());
        }

        self.counters.bodies_requested += 1;
        info!(
            entry_id = %id,
            token = %request.token,
            sink = %self.sink.name(),
            "Requested response body"
        );
        Ok(request)
    }

    /// Start a new session: cancel outstanding body requests and clear the
    /// store. Bodies that arrive later for the old session are dropped.
    pub fn reset(&mut self) {
        let previous = self.session;
        self.session = SessionId::new();
        let cancelled = self.pending.cancel_all(self.session);
        let cleared = self.store.len();
        self.store.reset();
        self.counters.resets += 1;
        self.publish();

        info!(
            previous_session = %previous.0,
            session = %self.session.0,
            cleared_entries = cleared,
            cancelled_requests = cancelled,
            "Session reset"
        );
    }

    fn publish(&mut self) {
        self.version += 1;
        let snapshot = self.store.snapshot(self.session, self.version);
        self.published.store(Arc::new(snapshot));
    }

    /// Entries visible under `filter`, in insertion order.
    pub fn entries(&self, filter: Option<&FilterSpec>) -> Vec<&NetworkEntry> {
        match filter {
            Some(filter) => filter.apply(self.store.list()),
            None => self.store.list().collect(),
        }
    }

    pub fn entry(&self, id: &str) -> Option<&NetworkEntry> {
        self.store.get(id)
    }

    /// Message history of a WebSocket or SSE entry.
    pub fn messages(&self, id: &str) -> Option<Messages<'_>> {
        self.store.get(id).and_then(Messages::of)
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Number of body requests still waiting for a response.
    pub fn pending_bodies(&self) -> usize {
        self.pending.len()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.published.load_full()
    }

    pub fn reader(&self) -> EngineReader {
        EngineReader {
            published: Arc::clone(&self.published),
        }
    }
}

fn clock() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
