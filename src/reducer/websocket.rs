//! WebSocket reducer.
//!
//! Connections move `Connecting → Open → Closed`, or to `Error` from any
//! non-terminal state. Messages are appended to the bounded history in every
//! state. A frame arriving after close is recorded but does not reopen the
//! connection.

use super::{advance, Applied, ReduceContext};
use crate::anomaly::AnomalyKind;
use crate::buffer::MessageBuffer;
use crate::entry::{ConnectionStatus, Lifecycle, WebSocketEntry, WebSocketMessage};
use crate::event::WebSocketEvent;
use crate::store::{EntryStore, StoreError, Upsert};
use tracing::debug;

fn connection(id: &str, url: &str, status: ConnectionStatus, ctx: &ReduceContext) -> WebSocketEntry {
    WebSocketEntry {
        id: id.to_string(),
        url: url.to_string(),
        start_time: ctx.now,
        status,
        messages: MessageBuffer::new(ctx.websocket_capacity),
        closed_at: None,
        close_code: None,
        close_reason: None,
        error: None,
    }
}

fn placeholder(id: &str, ctx: &ReduceContext) -> WebSocketEntry {
    let mut entry = connection(id, "", ConnectionStatus::Error, ctx);
    entry.error = Some("connection open was never observed".to_string());
    entry
}

fn applied(upsert: Upsert, event_type: &str) -> Applied {
    let applied = Applied::new(upsert);
    match upsert {
        Upsert::Created => applied.noted(
            AnomalyKind::UnknownEntry,
            format!("{event_type} for a connection that was never opened"),
        ),
        Upsert::Existing => applied,
    }
}

pub fn reduce(
    store: &mut EntryStore,
    event: WebSocketEvent,
    ctx: &ReduceContext,
) -> Result<Applied, StoreError> {
    let now = ctx.now;

    match event {
        WebSocketEvent::Connecting(start) => store.upsert(
            &start.id,
            || connection(&start.id, &start.url, ConnectionStatus::Connecting, ctx),
            |_: &mut WebSocketEntry, upsert| match upsert {
                Upsert::Created => Applied::new(upsert),
                Upsert::Existing => Applied::new(upsert)
                    .noted(AnomalyKind::Duplicate, "ws-connecting for an id already tracked"),
            },
        ),

        WebSocketEvent::Open(start) => store.upsert(
            &start.id,
            || connection(&start.id, &start.url, ConnectionStatus::Open, ctx),
            |entry: &mut WebSocketEntry, upsert| {
                let mut applied = Applied::new(upsert);
                if upsert == Upsert::Created {
                    return applied;
                }
                if entry.url.is_empty() {
                    entry.url = start.url.clone();
                }
                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Open);
                if !applied.status_changed {
                    applied = applied.noted(
                        AnomalyKind::LateEvent,
                        "ws-open for a connection that is not connecting",
                    );
                }
                applied
            },
        ),

        WebSocketEvent::Message(frame) => store.upsert(
            &frame.id,
            || placeholder(&frame.id, ctx),
            |entry: &mut WebSocketEntry, upsert| {
                let applied = applied(upsert, "ws-message");

                if entry.messages.last().is_some_and(|last| last.timestamp > now) {
                    debug!(entry_id = %entry.id, "WebSocket message timestamp went backwards");
                }
                let (id, evicted) = entry.messages.push_with(|id| WebSocketMessage {
                    id,
                    direction: frame.direction,
                    data: frame.data,
                    message_type: frame.message_type,
                    timestamp: now,
                });
                if evicted.is_some() {
                    debug!(entry_id = %entry.id, message_id = %id, "Evicted oldest WebSocket message");
                }

                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    debug!(entry_id = %entry.id, "Message recorded after connection closed");
                }
                applied
            },
        ),

        WebSocketEvent::Close(close) => store.upsert(
            &close.id,
            || placeholder(&close.id, ctx),
            |entry: &mut WebSocketEntry, upsert| {
                let mut applied = applied(upsert, "ws-close");
                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    return applied.noted(AnomalyKind::LateEvent, "ws-close after the connection ended");
                }

                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Closed);
                entry.closed_at = Some(now);
                entry.close_code = close.code;
                entry.close_reason = close.reason;
                applied
            },
        ),

        WebSocketEvent::Error(failure) => store.upsert(
            &failure.id,
            || placeholder(&failure.id, ctx),
            |entry: &mut WebSocketEntry, upsert| {
                let mut applied = applied(upsert, "ws-error");
                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    return applied.noted(AnomalyKind::LateEvent, "ws-error after the connection ended");
                }

                applied.status_changed = advance(&mut entry.status, ConnectionStatus::Error);
                entry.error = Some(failure.message);
                entry.closed_at.get_or_insert(now);
                applied
            },
        ),
    }
}
