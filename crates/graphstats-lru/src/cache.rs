use std::borrow::Borrow;
use std::hash::Hash;

use crate::index::{Iter, LruIndex};

/// An [`LruIndex`] that never holds more than `capacity` entries.
///
/// Inserting a new key into a full cache evicts the least recently used entry
/// and returns it. A cache with capacity zero retains nothing: `put` hands the
/// inserted entry straight back.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: LruIndex<K, V>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: LruIndex::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get_mut(key)
    }

    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.peek(key)
    }

    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.peek_mut(key)
    }

    /// Inserts `key` as most recently used.
    ///
    /// Replacing an existing key never evicts; its previous value is dropped.
    /// Otherwise, if the cache is full, the least recently used entry is
    /// removed first and returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return Some((key, value));
        }
        if self.entries.contains_key(&key) {
            self.entries.put(key, value);
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_lru()
        } else {
            None
        };
        self.entries.put(key, value);
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key)
    }

    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        self.entries.pop_lru()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.entries)
            .finish()
    }
}
