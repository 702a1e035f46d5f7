//! Timestamped cache entries threaded onto an LRU list.
//!
//! A single record carries the shared value handle, the bookkeeping
//! timestamps and the list links, so touching an entry is one unlink and one
//! relink with no extra indirection. Records live in an arena of reusable
//! slots and are addressed by [`EntryId`]; the cache's primary index maps
//! keys to ids, and an id stays valid until the entry is removed.
//!
//! The most recently used entry is at the front of the list, the least
//! recently used at the back. The list does not track sizes; the cache
//! controller accounts for them when entries are installed, reassigned and
//! removed.

use std::sync::Arc;

use tokio::time::Instant;

/// Stable handle to an entry in an [`LruList`].
///
/// The numeric slot may be reused after the entry is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryId(usize);

/// A resident cache value with its read/load timestamps and cached size.
#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    key: K,
    value: Arc<V>,
    loaded_at: Instant,
    last_read_at: Instant,
    size: usize,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: Arc<V>, size: usize, now: Instant) -> Self {
        Self {
            key,
            value,
            loaded_at: now,
            last_read_at: now,
            size,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Reads the value without updating any bookkeeping.
    pub fn peek(&self) -> &V {
        &self.value
    }

    /// Returns a shared handle to the value without updating any bookkeeping.
    pub fn handle(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }

    /// Records a read. The caller is responsible for also moving the entry
    /// to the front of its list.
    pub fn mark_read(&mut self, now: Instant) {
        self.last_read_at = now;
    }

    /// Replaces the value in place after a successful background reload.
    ///
    /// Updates the load time and cached size but leaves the read time
    /// untouched, so a reload does not count as a read. Returns the previous
    /// size so the caller can fix up its size accounting.
    pub fn reassign(&mut self, value: Arc<V>, size: usize, now: Instant) -> usize {
        let old_size = self.size;
        self.value = value;
        self.loaded_at = now;
        self.size = size;
        old_size
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn last_read_at(&self) -> Instant {
        self.last_read_at
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug)]
struct Node<K, V> {
    entry: Entry<K, V>,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

/// Doubly-linked LRU list over an arena of reusable slots.
#[derive(Debug)]
pub(crate) struct LruList<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    len: usize,
}

impl<K, V> LruList<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Inserts an entry at the front (MRU position) and returns its id.
    pub fn push_front(&mut self, entry: Entry<K, V>) -> EntryId {
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        let id = EntryId(idx);
        self.len += 1;
        self.attach_front(id);
        id
    }

    /// Moves an existing entry to the front (MRU position).
    pub fn move_to_front(&mut self, id: EntryId) {
        if self.head == Some(id) {
            return;
        }
        self.detach(id);
        self.attach_front(id);
    }

    /// Unlinks the entry and frees its slot, returning the entry.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry<K, V>> {
        self.slots.get(id.0)?.as_ref()?;
        self.detach(id);
        let node = self.slots[id.0].take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(node.entry)
    }

    /// The least recently used entry, at the back of the list.
    pub fn back(&self) -> Option<EntryId> {
        self.tail
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry<K, V>> {
        self.slots.get(id.0)?.as_ref().map(|node| &node.entry)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry<K, V>> {
        self.slots
            .get_mut(id.0)?
            .as_mut()
            .map(|node| &mut node.entry)
    }

    /// Iterates front to back (MRU to LRU).
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry<K, V>)> {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let id = current?;
            let node = self.slots[id.0].as_ref()?;
            current = node.next;
            Some((id, &node.entry))
        })
    }

    /// Snapshot of all ids, front to back. Used by sweeps that remove
    /// entries while walking.
    pub fn ids(&self) -> Vec<EntryId> {
        self.iter().map(|(id, _)| id).collect()
    }

    fn attach_front(&mut self, id: EntryId) {
        let old_head = self.head;
        {
            let node = self.slots[id.0].as_mut().expect("attaching a freed slot");
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            if let Some(node) = self.slots[old_head.0].as_mut() {
                node.prev = Some(id);
            }
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn detach(&mut self, id: EntryId) {
        let (prev, next) = {
            let node = self.slots[id.0].as_mut().expect("detaching a freed slot");
            let links = (node.prev, node.next);
            node.prev = None;
            node.next = None;
            links
        };
        match prev {
            Some(prev) => {
                if let Some(node) = self.slots[prev.0].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(node) = self.slots[next.0].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn validate(&self) {
        let mut seen = 0;
        let mut prev: Option<EntryId> = None;
        let mut current = self.head;
        while let Some(id) = current {
            let node = self.slots[id.0].as_ref().expect("link to a freed slot");
            assert_eq!(node.prev, prev, "broken back link at slot {}", id.0);
            seen += 1;
            prev = current;
            current = node.next;
        }
        assert_eq!(self.tail, prev, "tail does not match the last node");
        assert_eq!(seen, self.len, "length does not match the chain");
        let live = self.slots.iter().filter(|slot| slot.is_some()).count();
        assert_eq!(live, self.len, "live slots do not match the length");
    }
}
