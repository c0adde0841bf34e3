//! Server-Sent-Events reducer.
//!
//! Same lifecycle as WebSocket connections, without a send direction. Every
//! server event is appended to the bounded history unconditionally.

use super::{advance, Applied, ReduceContext};
use crate::anomaly::AnomalyKind;
use crate::buffer::MessageBuffer;
use crate::entry::{ConnectionStatus, Headers, Lifecycle, SseEntry, SseMessage};
use crate::event::SseEvent;
use crate::store::{EntryStore, StoreError, Upsert};
use tracing::debug;

fn connection(id: &str, url: &str, status: ConnectionStatus, ctx: &ReduceContext) -> SseEntry {
    SseEntry {
        id: id.to_string(),
        url: url.to_string(),
        start_time: ctx.now,
        status,
        request_headers: Headers::new(),
        response_headers: Headers::new(),
        messages: MessageBuffer::new(ctx.sse_capacity),
        closed_at: None,
        error: None,
    }
}

fn placeholder(id: &str, ctx: &ReduceContext) -> SseEntry {
    let mut entry = connection(id, "", ConnectionStatus::Error, ctx);
    entry.error = Some("event stream open was never observed".to_string());
    entry
}

fn applied(upsert: Upsert, event_type: &str) -> Applied {
    let applied = Applied::new(upsert);
    match upsert {
        Upsert::Created => applied.noted(
            AnomalyKind::UnknownEntry,
            format!("{event_type} for a stream that was never opened"),
        ),
        Upsert::Existing => applied,
    }
}

pub fn reduce(
    store: &mut EntryStore,
    event: SseEvent,
    ctx: &ReduceContext,
) -> Result<Applied, StoreError> {
    let now = ctx.now;

    match event {
        SseEvent::Connecting(start) => store.upsert(
            &start.id,
            || connection(&start.id, &start.url, ConnectionStatus::Connecting, ctx),
            |_: &mut SseEntry, upsert| match upsert {
                Upsert::Created => Applied::new(upsert),
                Upsert::Existing => Applied::new(upsert)
                    .noted(AnomalyKind::Duplicate, "sse-connecting for an id already tracked"),
            },
        ),

        SseEvent::Open(open) => store.upsert(
            &open.id,
            || connection(&open.id, &open.url, ConnectionStatus::Open, ctx),
            |entry: &mut SseEntry, upsert| {
                let mut applied = Applied::new(upsert);
                entry.request_headers = open.request_headers;
                entry.response_headers = open.response_headers;
                if upsert == Upsert::Created {
                    return applied;
                }
                if entry.url.is_empty() {
                    entry.url = open.url.clone();
                }
                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Open);
                if !applied.status_changed {
                    applied = applied.noted(
                        AnomalyKind::LateEvent,
                        "sse-open for a stream that is not connecting",
                    );
                }
                applied
            },
        ),

        SseEvent::Message(frame) => store.upsert(
            &frame.id,
            || placeholder(&frame.id, ctx),
            |entry: &mut SseEntry, upsert| {
                let applied = applied(upsert, "sse-message");

                if entry.messages.last().is_some_and(|last| last.timestamp > now) {
                    debug!(entry_id = %entry.id, "SSE message timestamp went backwards");
                }
                let (id, evicted) = entry.messages.push_with(|id| SseMessage {
                    id,
                    event_type: frame.event_type,
                    data: frame.data,
                    timestamp: now,
                });
                if evicted.is_some() {
                    debug!(entry_id = %entry.id, message_id = %id, "Evicted oldest SSE message");
                }
                applied
            },
        ),

        SseEvent::Close(close) => store.upsert(
            &close.id,
            || placeholder(&close.id, ctx),
            |entry: &mut SseEntry, upsert| {
                let mut applied = applied(upsert, "sse-close");
                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    return applied.noted(AnomalyKind::LateEvent, "sse-close after the stream ended");
                }

                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Closed);
                entry.closed_at = Some(now);
                applied
            },
        ),

        SseEvent::Error(failure) => store.upsert(
            &failure.id,
            || placeholder(&failure.id, ctx),
            |entry: &mut SseEntry, upsert| {
                let mut applied = applied(upsert, "sse-error");
                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    return applied.noted(AnomalyKind::LateEvent, "sse-error after the stream ended");
                }

                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Error);
                entry.error = Some(failure.message);
                entry.closed_at.get_or_insert(now);
                applied
            },
        ),
    }
}
