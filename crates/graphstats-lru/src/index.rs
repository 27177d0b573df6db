use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

struct Node<K, V> {
    key: K,
    value: V,
    before: Option<NodeId>,
    after: Option<NodeId>,
}

/// Doubly linked recency list with a key index.
///
/// `put` and any touching lookup move an entry to the tail; `pop_lru` removes
/// the head.
pub struct LruIndex<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free_slots: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    index: HashMap<K, NodeId>,
}

impl<K, V> LruIndex<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_slots: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = *self.index.get(key)?;
        self.move_to_tail(id);
        Some(&self.node(id).value)
    }

    /// Like [`LruIndex::get`], but returns a mutable reference.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = *self.index.get(key)?;
        self.move_to_tail(id);
        Some(&mut self.node_mut(id).value)
    }

    /// Returns the value for `key` without changing its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = *self.index.get(key)?;
        Some(&self.node(id).value)
    }

    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = *self.index.get(key)?;
        Some(&mut self.node_mut(id).value)
    }

    /// Marks `key` most recently used. Returns `false` if it is not present.
    pub fn touch<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.index.get(key).copied() {
            Some(id) => {
                self.move_to_tail(id);
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces `key` at the tail. Returns the replaced value.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        if let Some(id) = self.index.get(&key).copied() {
            self.move_to_tail(id);
            let old = std::mem::replace(&mut self.node_mut(id).value, value);
            return Some(old);
        }

        let id = self.alloc(Node {
            key: key.clone(),
            value,
            before: None,
            after: None,
        });
        self.link_at_tail(id);
        self.index.insert(key, id);
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = self.index.remove(key)?;
        Some(self.unlink_and_free(id).1)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let id = self.head?;
        let (key, value) = self.unlink_and_free(id);
        self.index.remove(&key);
        Some((key, value))
    }

    /// The least recently used entry, without touching it.
    pub fn peek_lru(&self) -> Option<(&K, &V)> {
        let node = self.node(self.head?);
        Some((&node.key, &node.value))
    }

    /// The most recently used entry, without touching it.
    pub fn peek_mru(&self) -> Option<(&K, &V)> {
        let node = self.node(self.tail?);
        Some((&node.key, &node.value))
    }

    /// Iterates from least to most recently used.
    ///
    /// The iterator borrows the index, so the order cannot change underneath it.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            current: self.head,
            remaining: self.index.len(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        match self.nodes[id.0].as_ref() {
            Some(node) => node,
            None => unreachable!("dangling lru node {}", id.0),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        match self.nodes[id.0].as_mut() {
            Some(node) => node,
            None => unreachable!("dangling lru node {}", id.0),
        }
    }

    fn link_at_tail(&mut self, id: NodeId) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(id);
            node.before = old_tail;
            node.after = None;
        }
        match old_tail {
            Some(tail) => self.node_mut(tail).after = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    fn unlink(&mut self, id: NodeId) {
        let (before, after) = {
            let node = self.node(id);
            (node.before, node.after)
        };
        match before {
            Some(before) => self.node_mut(before).after = after,
            None => self.head = after,
        }
        match after {
            Some(after) => self.node_mut(after).before = before,
            None => self.tail = before,
        }
        let node = self.node_mut(id);
        node.before = None;
        node.after = None;
    }

    fn move_to_tail(&mut self, id: NodeId) {
        if self.tail == Some(id) {
            return;
        }
        self.unlink(id);
        self.link_at_tail(id);
    }

    fn unlink_and_free(&mut self, id: NodeId) -> (K, V) {
        self.unlink(id);
        let node = match self.nodes[id.0].take() {
            Some(node) => node,
            None => unreachable!("dangling lru node {}", id.0),
        };
        self.free_slots.push(id.0);
        (node.key, node.value)
    }
}

impl<K, V> Default for LruIndex<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for LruIndex<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over an [`LruIndex`], least recently used first.
pub struct Iter<'a, K, V> {
    nodes: &'a [Option<Node<K, V>>],
    current: Option<NodeId>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.nodes[id.0].as_ref()?;
        self.current = node.after;
        self.remaining = self.remaining.saturating_sub(1);
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
