//! Bounded most-recently-used cache.
//!
//! Entries live in a slab threaded by an intrusive doubly-linked list, so
//! lookup, promotion and eviction are all O(1). When the cache is full the
//! least recently used entry is evicted.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// MRU cache with a fixed capacity.
#[derive(Debug)]
pub struct MruCache<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> MruCache<K, V> {
    /// Create an empty cache; a capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HashMap::with_capacity(capacity),
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&self.entries[idx].value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.entries[idx].value)
    }

    /// Insert or overwrite `key`, marking it most recently used.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].value = value;
            self.promote(idx);
            return;
        }
        self.put_new_key(key, value);
    }

    /// Insert a key the caller knows is absent.
    ///
    /// Skips the existence check done by [`MruCache::put`]. Inserting a key
    /// that is already present leaves a stale slot behind until eviction.
    pub fn put_new_key(&mut self, key: K, value: V) {
        debug_assert!(!self.index.contains_key(&key));
        if self.index.len() >= self.capacity {
            self.evict_lru();
        }
        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = entry;
                idx
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.push_front(idx);
        self.index.insert(key, idx);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn evict_lru(&mut self) {
        let Some(idx) = self.tail else {
            return;
        };
        self.unlink(idx);
        self.index.remove(&self.entries[idx].key);
        self.free.push(idx);
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        self.entries[idx].prev = None;
        self.entries[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.entries[idx].prev = None;
        self.entries[idx].next = self.head;
        match self.head {
            Some(h) => self.entries[h].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}
