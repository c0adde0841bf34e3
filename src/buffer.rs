//! Fixed-capacity message history.
//!
//! [`MessageBuffer`] is a ring buffer used for WebSocket and SSE message
//! histories and for the anomaly log. When the buffer is full, the oldest
//! item is evicted before the newest is appended.
//!
//! Every appended item is assigned a [`MessageId`] from a counter that never
//! goes backwards, so ids are never reused. Looking up an id that has been
//! evicted returns `None` rather than whatever now occupies that slot.
//!
//! Storage is an [`im::Vector`], so cloning a buffer shares its items and
//! appending to a clone costs the same as appending to the original.

use im::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a message inside one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded FIFO history with stable ids.
///
/// A buffer is cloned whenever its entry is copied for a new snapshot; the
/// clone shares structure with the original.
#[derive(Debug, Clone)]
pub struct MessageBuffer<T> {
    items: Vector<Arc<T>>,
    capacity: usize,
    /// Id that the next appended item will receive.
    next_id: u64,
    evicted: u64,
}

impl<T> MessageBuffer<T> {
    /// Create an empty buffer. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vector::new(),
            capacity,
            next_id: 0,
            evicted: 0,
        }
    }

    /// Append an item built from its freshly assigned id.
    ///
    /// Returns the id and, if the buffer was full, the evicted item.
    pub fn push_with<F>(&mut self, build: F) -> (MessageId, Option<Arc<T>>)
    where
        F: FnOnce(MessageId) -> T,
    {
        let evicted = if self.items.len() == self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };

        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.items.push_back(Arc::new(build(id)));

        (id, evicted)
    }

    /// Look up an item by id. Evicted or never-assigned ids miss.
    pub fn get(&self, id: MessageId) -> Option<&T> {
        let first = self.first_id();
        if id.0 < first || id.0 >= self.next_id {
            return None;
        }
        let index = usize::try_from(id.0 - first).ok()?;
        self.items.get(index).map(|item| item.as_ref())
    }

    /// Id of the oldest retained item (equal to the next id when empty).
    fn first_id(&self) -> u64 {
        self.next_id - self.items.len() as u64
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items dropped by eviction since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Total number of items ever appended.
    pub fn total_appended(&self) -> u64 {
        self.next_id
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back().map(|item| item.as_ref())
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter().map(|item| item.as_ref())
    }

    /// Remove everything while keeping the id counter.
    pub fn clear(&mut self) {
        self.evicted += self.items.len() as u64;
        self.items.clear();
    }
}

impl<T: PartialEq> PartialEq for MessageBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity
            && self.next_id == other.next_id
            && self.items.len() == other.items.len()
            && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Serialize> Serialize for MessageBuffer<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}
