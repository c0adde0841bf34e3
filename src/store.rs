//! Entry store.
//!
//! [`EntryStore`] is the single source of truth for tracked entries: a map
//! from entry id to [`NetworkEntry`] plus the insertion order used for
//! display. It is owned by the consuming task and mutated only through
//! [`EntryStore::upsert`].
//!
//! Readers never touch the store directly. After each applied event the
//! owner publishes a [`StoreSnapshot`], an immutable view whose entries are
//! shared with the store through `Arc`. A transition on an entry that a
//! snapshot still references copies the entry first, so a snapshot never
//! observes a half-applied transition.
//!
//! Both the id map and the insertion order are persistent `im` collections.
//! Taking a snapshot clones two roots, independent of how many entries the
//! session has accumulated.

use crate::entry::{EntryVariant, NetworkEntry, Protocol};
use crate::filter::FilterSpec;
use crate::projection::Messages;
use im::{HashMap, Vector};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The id already belongs to an entry of another protocol
    #[error("entry '{id}' is tracked as {existing}, not {requested}")]
    ProtocolMismatch {
        id: String,
        existing: Protocol,
        requested: Protocol,
    },
}

/// Whether an upsert created the entry or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Existing,
}

/// Identifies one store lifetime between resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<String, Arc<NetworkEntry>>,
    order: Vector<String>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transition` to the entry `id`, creating it with `create` when
    /// absent.
    ///
    /// The transition runs against the concrete variant for `E`. If `id` is
    /// already tracked under another protocol nothing is applied and
    /// [`StoreError::ProtocolMismatch`] is returned.
    pub fn upsert<E, C, T, R>(&mut self, id: &str, create: C, transition: T) -> Result<R, StoreError>
    where
        E: EntryVariant,
        C: FnOnce() -> E,
        T: FnOnce(&mut E, Upsert) -> R,
    {
        if let Some(slot) = self.entries.get_mut(id) {
            let existing = slot.protocol();
            if existing != E::PROTOCOL {
                return Err(StoreError::ProtocolMismatch {
                    id: id.to_string(),
                    existing,
                    requested: E::PROTOCOL,
                });
            }

            // Copies the entry when a published snapshot still holds it.
            let entry = Arc::make_mut(slot);
            let variant = E::variant_mut(entry).ok_or_else(|| StoreError::ProtocolMismatch {
                id: id.to_string(),
                existing,
                requested: E::PROTOCOL,
            })?;
            return Ok(transition(variant, Upsert::Existing));
        }

        let mut created = create();
        let result = transition(&mut created, Upsert::Created);
        self.entries
            .insert(id.to_string(), Arc::new(created.into_entry()));
        self.order.push_back(id.to_string());
        Ok(result)
    }

    pub fn get(&self, id: &str) -> Option<&NetworkEntry> {
        self.entries.get(id).map(|entry| entry.as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Entries in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.as_ref())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Freeze the current contents into a shareable snapshot.
    pub fn snapshot(&self, session: SessionId, version: u64) -> StoreSnapshot {
        StoreSnapshot {
            session,
            version,
            entries: self.entries.clone(),
            order: self.order.clone(),
        }
    }
}

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    session: SessionId,
    version: u64,
    entries: HashMap<String, Arc<NetworkEntry>>,
    order: Vector<String>,
}

impl StoreSnapshot {
    pub fn empty(session: SessionId) -> Self {
        Self {
            session,
            version: 0,
            entries: HashMap::new(),
            order: Vector::new(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Increases every time the owner publishes.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All entries in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.as_ref())
    }

    /// Entries visible under `filter`, in insertion order. `None` lists all.
    pub fn entries(&self, filter: Option<&FilterSpec>) -> Vec<&NetworkEntry> {
        match filter {
            Some(filter) => filter.apply(self.list()),
            None => self.list().collect(),
        }
    }

    pub fn entry(&self, id: &str) -> Option<&NetworkEntry> {
        self.entries.get(id).map(|entry| entry.as_ref())
    }

    /// Message history of a WebSocket or SSE entry.
    pub fn messages(&self, id: &str) -> Option<Messages<'_>> {
        self.entry(id).and_then(Messages::of)
    }
}
