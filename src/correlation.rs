//! Outstanding response-body requests.
//!
//! Body fetches cross an async boundary: the engine sends a command to the
//! instrumented process and the body comes back later as a `response-body`
//! event. [`PendingBodies`] tracks the requests that are still outstanding,
//! keyed by entry id, each with a token and the session it was issued in.
//! Starting a new session cancels everything, so a body that arrives for a
//! previous session never matches.

use crate::store::SessionId;
use std::collections::HashMap;
use uuid::Uuid;

/// An outstanding body request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyRequest {
    pub token: Uuid,
    pub session: SessionId,
}

/// Why a body response was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Nothing is outstanding for this id in the current session
    NotRequested,
    /// A request is outstanding but the echoed token differs
    TokenMismatch,
    /// Tokens are required and the body carried none
    TokenMissing,
}

#[derive(Debug)]
pub struct PendingBodies {
    session: SessionId,
    requests: HashMap<String, BodyRequest>,
    require_token: bool,
}

impl PendingBodies {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            requests: HashMap::new(),
            require_token: false,
        }
    }

    /// Reject bodies that do not echo the request token.
    pub fn with_required_tokens(mut self, required: bool) -> Self {
        self.require_token = required;
        self
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Register a request for `id`.
    ///
    /// Returns the request and whether it is new. A second request for an id
    /// that is still outstanding reuses the first one.
    pub fn begin(&mut self, id: &str) -> (BodyRequest, bool) {
        if let Some(existing) = self.requests.get(id) {
            return (*existing, false);
        }

        let request = BodyRequest {
            token: Uuid::new_v4(),
            session: self.session,
        };
        self.requests.insert(id.to_string(), request);
        (request, true)
    }

    /// Match an incoming body against the outstanding request and retire it.
    ///
    /// Unless tokens are required, a body without a token matches any
    /// outstanding request for the id. After a reset that reuses an id, a
    /// late tokenless body from the previous session is then taken as the
    /// answer to the new request. Bridges that echo tokens should run with
    /// [`PendingBodies::with_required_tokens`].
    pub fn resolve(&mut self, id: &str, token: Option<Uuid>) -> Result<BodyRequest, Mismatch> {
        let request = self.requests.get(id).copied().ok_or(Mismatch::NotRequested)?;
        if request.session != self.session {
            self.requests.remove(id);
            return Err(Mismatch::NotRequested);
        }
        match token {
            Some(token) if token != request.token => return Err(Mismatch::TokenMismatch),
            None if self.require_token => return Err(Mismatch::TokenMissing),
            _ => {}
        }
        self.requests.remove(id);
        Ok(request)
    }

    /// Forget the outstanding request for `id`, if any.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.requests.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drop every outstanding request and move to `session`.
    ///
    /// Returns how many requests were cancelled.
    pub fn cancel_all(&mut self, session: SessionId) -> usize {
        let cancelled = self.requests.len();
        self.requests.clear();
        self.session = session;
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_dedupes() {
        let mut pending = PendingBodies::new(SessionId::new());
        let (first, fresh) = pending.begin("1");
        let (second, fresh_again) = pending.begin("1");

        assert!(fresh);
        assert!(!fresh_again);
        assert_eq!(first, second);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_resolve_retires_request() {
        let mut pending = PendingBodies::new(SessionId::new());
        let (request, _) = pending.begin("1");

        assert_eq!(pending.resolve("1", Some(request.token)), Ok(request));
        assert!(!pending.is_pending("1"));
        assert_eq!(pending.resolve("1", None), Err(Mismatch::NotRequested));
    }

    #[test]
    fn test_token_mismatch_keeps_request() {
        let mut pending = PendingBodies::new(SessionId::new());
        pending.begin("1");

        assert_eq!(
            pending.resolve("1", Some(Uuid::new_v4())),
            Err(Mismatch::TokenMismatch)
        );
        assert!(pending.is_pending("1"));
        assert!(pending.resolve("1", None).is_ok());
    }

    #[test]
    fn test_required_token_rejects_tokenless_body() {
        let mut pending = PendingBodies::new(SessionId::new()).with_required_tokens(true);
        let (request, _) = pending.begin("1");

        assert_eq!(pending.resolve("1", None), Err(Mismatch::TokenMissing));
        assert!(pending.is_pending("1"));
        assert_eq!(pending.resolve("1", Some(request.token)), Ok(request));
    }

    #[test]
    fn test_cancel_single() {
        let mut pending = PendingBodies::new(SessionId::new());
        pending.begin("1");

        assert!(pending.cancel("1"));
        assert!(!pending.cancel("1"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_cancel_all_invalidates_previous_session() {
        let mut pending = PendingBodies::new(SessionId::new());
        let (request, _) = pending.begin("1");
        pending.begin("2");

        let next = SessionId::new();
        assert_eq!(pending.cancel_all(next), 2);
        assert_eq!(pending.session(), next);
        assert_eq!(
            pending.resolve("1", Some(request.token)),
            Err(Mismatch::NotRequested)
        );
    }
}
