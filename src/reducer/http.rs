//! HTTP reducer.
//!
//! ```text
//! request-start ──▶ Pending
//! response-start    Pending ──▶ HeadersReceived
//! response-body     (fills response.body, status unchanged)
//! response-end      HeadersReceived ──▶ Complete
//!                   Pending ──▶ Failed (no response headers were seen)
//! error             Pending | HeadersReceived ──▶ Failed
//! ```
//!
//! Events naming an id that was never started create a placeholder entry
//! that is already `Failed`, then contribute whatever data they carry.

use super::{advance, Applied, ReduceContext};
use crate::anomaly::AnomalyKind;
use crate::entry::{HttpEntry, HttpRequest, HttpResponse, HttpStatus, Lifecycle, ResponseBody};
use crate::event::{HttpEvent, RequestStart};
use crate::store::{EntryStore, StoreError, Upsert};
use crate::entry::Headers;
use tracing::debug;

fn started(start: &RequestStart, now: i64) -> HttpEntry {
    HttpEntry {
        id: start.id.clone(),
        url: start.url.clone(),
        start_time: now,
        status: HttpStatus::Pending,
        request: HttpRequest {
            method: start.method.clone(),
            headers: start.headers.clone(),
            body: start.body.clone(),
        },
        response: None,
        end_time: None,
        error: None,
    }
}

/// Stand-in for a request whose start was never observed.
fn placeholder(id: &str, now: i64) -> HttpEntry {
    HttpEntry {
        id: id.to_string(),
        url: String::new(),
        start_time: now,
        status: HttpStatus::Failed,
        request: HttpRequest {
            method: String::new(),
            headers: Headers::new(),
            body: None,
        },
        response: None,
        end_time: None,
        error: Some("request start was never observed".to_string()),
    }
}

fn applied(upsert: Upsert, event_type: &str) -> Applied {
    let applied = Applied::new(upsert);
    match upsert {
        Upsert::Created => applied.noted(
            AnomalyKind::UnknownEntry,
            format!("{event_type} for a request that was never started"),
        ),
        Upsert::Existing => applied,
    }
}

pub fn reduce(
    store: &mut EntryStore,
    event: HttpEvent,
    ctx: &ReduceContext,
) -> Result<Applied, StoreError> {
    let now = ctx.now;

    match event {
        HttpEvent::RequestStart(start) => store.upsert(
            &start.id,
            || started(&start, now),
            |_, upsert| match upsert {
                Upsert::Created => Applied::new(upsert),
                Upsert::Existing => Applied::new(upsert)
                    .noted(AnomalyKind::Duplicate, "request-start for an id already tracked"),
            },
        ),

        HttpEvent::ResponseStart(start) => store.upsert(
            &start.id,
            || placeholder(&start.id, now),
            |entry: &mut HttpEntry, upsert| {
                let mut applied = applied(upsert, "response-start");
                if entry.response.is_some() {
                    return applied.noted(AnomalyKind::Duplicate, "second response-start");
                }

                entry.response = Some(HttpResponse {
                    status_code: start.status_code,
                    headers: start.headers,
                    body: None,
                });
                applied.status_changed = advance(&mut entry.status, HttpStatus::HeadersReceived);
                if !applied.status_changed {
                    applied = applied.noted(
                        AnomalyKind::LateEvent,
                        "response-start after the request finished",
                    );
                }
                applied
            },
        ),

        HttpEvent::ResponseBody(body) => store.upsert(
            &body.id,
            || placeholder(&body.id, now),
            |entry: &mut HttpEntry, upsert| {
                let applied = applied(upsert, "response-body");
                match entry.response.as_mut() {
                    Some(response) => {
                        debug!(entry_id = %entry.id, content_type = %body.content_type, "Response body filled");
                        response.body = Some(ResponseBody {
                            content_type: body.content_type,
                            data: body.data,
                        });
                        applied
                    }
                    None => applied.noted(
                        AnomalyKind::OutOfOrder,
                        "response-body before response-start",
                    ),
                }
            },
        ),

        HttpEvent::ResponseEnd(end) => store.upsert(
            &end.id,
            || placeholder(&end.id, now),
            |entry: &mut HttpEntry, upsert| {
                let mut applied = applied(upsert, "response-end");
                match entry.status {
                    HttpStatus::HeadersReceived => {
                        applied.status_changed = advance(&mut entry.status, HttpStatus::Complete);
                        entry.end_time = Some(now);
                    }
                    HttpStatus::Pending => {
                        applied.status_changed = advance(&mut entry.status, HttpStatus::Failed);
                        entry.end_time = Some(now);
                        entry.error = Some("response ended before response headers".to_string());
                        applied = applied.noted(
                            AnomalyKind::OutOfOrder,
                            "response-end without response-start",
                        );
                    }
                    HttpStatus::Complete | HttpStatus::Failed => {
                        if entry.end_time.is_none() {
                            entry.end_time = Some(now);
                        }
                        applied = applied
                            .noted(AnomalyKind::LateEvent, "response-end after the request finished");
                    }
                }
                applied
            },
        ),

        HttpEvent::Error(failure) => store.upsert(
            &failure.id,
            || placeholder(&failure.id, now),
            |entry: &mut HttpEntry, upsert| {
                let mut applied = applied(upsert, "error");
                if entry.status.is_terminal() && upsert == Upsert::Existing {
                    // Terminal states are sticky: an error after completion is ignored.
                    return applied.noted(AnomalyKind::LateEvent, "error after the request finished");
                }

                applied.status_changed = advance(&mut entry.status, HttpStatus::Failed);
                entry.error = Some(failure.message);
                entry.end_time.get_or_insert(now);
                applied
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NetworkEntry;
    use crate::event::{EntryRef, Failure, ResponseBodyFilled, ResponseStart};
    use proptest::prelude::*;

    fn ctx(now: i64) -> ReduceContext {
        ReduceContext {
            now,
            websocket_capacity: 8,
            sse_capacity: 8,
        }
    }

    fn request_start(id: &str, url: &str) -> HttpEvent {
        HttpEvent::RequestStart(RequestStart {
            id: id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: Headers::new(),
            body: None,
        })
    }

    fn response_start(id: &str, status_code: u16) -> HttpEvent {
        HttpEvent::ResponseStart(ResponseStart {
            id: id.to_string(),
            status_code,
            headers: Headers::new(),
        })
    }

    fn response_end(id: &str) -> HttpEvent {
        HttpEvent::ResponseEnd(EntryRef { id: id.to_string() })
    }

    fn error(id: &str) -> HttpEvent {
        HttpEvent::Error(Failure {
            id: id.to_string(),
            message: "connection reset".to_string(),
        })
    }

    fn http<'a>(store: &'a EntryStore, id: &str) -> &'a HttpEntry {
        store.get(id).and_then(NetworkEntry::as_http).unwrap()
    }

    #[test]
    fn test_complete_lifecycle() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(100)).unwrap();
        reduce(&mut store, response_start("1", 200), &ctx(150)).unwrap();
        let applied = reduce(&mut store, response_end("1"), &ctx(180)).unwrap();

        let entry = http(&store, "1");
        assert!(applied.status_changed);
        assert!(applied.note.is_none());
        assert_eq!(entry.status, HttpStatus::Complete);
        assert_eq!(entry.url, "/a");
        assert_eq!(entry.response.as_ref().map(|r| r.status_code), Some(200));
        assert_eq!(entry.duration_ms(), Some(80));
        assert!(entry.response.as_ref().unwrap().body.is_none());
    }

    #[test]
    fn test_response_end_without_anything_fails() {
        let mut store = EntryStore::new();
        let applied = reduce(&mut store, response_end("3"), &ctx(5)).unwrap();

        assert!(applied.is_created());
        assert_eq!(
            applied.note.map(|n| n.kind),
            Some(AnomalyKind::UnknownEntry)
        );
        assert_eq!(http(&store, "3").status, HttpStatus::Failed);
    }

    #[test]
    fn test_response_end_before_response_start_fails() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(1)).unwrap();
        let applied = reduce(&mut store, response_end("1"), &ctx(2)).unwrap();

        assert_eq!(applied.note.map(|n| n.kind), Some(AnomalyKind::OutOfOrder));
        let entry = http(&store, "1");
        assert_eq!(entry.status, HttpStatus::Failed);
        assert_eq!(entry.end_time, Some(2));
    }

    #[test]
    fn test_error_from_pending() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(1)).unwrap();
        reduce(&mut store, error("1"), &ctx(9)).unwrap();

        let entry = http(&store, "1");
        assert_eq!(entry.status, HttpStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("connection reset"));
        assert_eq!(entry.end_time, Some(9));
    }

    #[test]
    fn test_error_after_complete_is_ignored() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(1)).unwrap();
        reduce(&mut store, response_start("1", 204), &ctx(2)).unwrap();
        reduce(&mut store, response_end("1"), &ctx(3)).unwrap();
        let applied = reduce(&mut store, error("1"), &ctx(4)).unwrap();

        assert!(!applied.status_changed);
        assert_eq!(applied.note.map(|n| n.kind), Some(AnomalyKind::LateEvent));
        let entry = http(&store, "1");
        assert_eq!(entry.status, HttpStatus::Complete);
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_duplicate_request_start_is_ignored() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(1)).unwrap();
        let applied = reduce(&mut store, request_start("1", "/b"), &ctx(2)).unwrap();

        assert_eq!(applied.note.map(|n| n.kind), Some(AnomalyKind::Duplicate));
        assert_eq!(http(&store, "1").url, "/a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_body_fill_keeps_status() {
        let mut store = EntryStore::new();
        reduce(&mut store, request_start("1", "/a"), &ctx(1)).unwrap();
        reduce(&mut store, response_start("1", 200), &ctx(2)).unwrap();
        let body = HttpEvent::ResponseBody(ResponseBodyFilled {
            id: "1".to_string(),
            content_type: "application/json".to_string(),
            data: Some("{}".to_string()),
            token: None,
        });
        let applied = reduce(&mut store, body, &ctx(3)).unwrap();

        assert!(!applied.status_changed);
        let entry = http(&store, "1");
        assert_eq!(entry.status, HttpStatus::HeadersReceived);
        let body = entry.response.as_ref().unwrap().body.as_ref().unwrap();
        assert_eq!(body.content_type, "application/json");
        assert_eq!(body.data.as_deref(), Some("{}"));
    }

    fn rank(status: HttpStatus) -> u8 {
        match status {
            HttpStatus::Pending => 0,
            HttpStatus::HeadersReceived => 1,
            HttpStatus::Complete | HttpStatus::Failed => 2,
        }
    }

    proptest! {
        #[test]
        fn prop_status_never_moves_backward(kinds in proptest::collection::vec(0u8..5, 1..20)) {
            let mut store = EntryStore::new();
            let mut previous: Option<HttpStatus> = None;

            for (step, kind) in kinds.into_iter().enumerate() {
                let event = match kind {
                    0 => request_start("p", "/p"),
                    1 => response_start("p", 200),
                    2 => HttpEvent::ResponseBody(ResponseBodyFilled {
                        id: "p".to_string(),
                        content_type: "text/plain".to_string(),
                        data: None,
                        token: None,
                    }),
                    3 => response_end("p"),
                    _ => error("p"),
                };
                reduce(&mut store, event, &ctx(step as i64)).unwrap();

                let status = http(&store, "p").status;
                if let Some(previous) = previous {
                    prop_assert!(
                        previous == status || previous.can_advance_to(status),
                        "illegal transition {:?} -> {:?}", previous, status
                    );
                    prop_assert!(rank(status) >= rank(previous));
                    if previous.is_terminal() {
                        prop_assert_eq!(previous, status);
                    }
                }
                previous = Some(status);
            }
        }
    }
}
