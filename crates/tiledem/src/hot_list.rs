//! Bounded most-recently-used list with O(1) promotion and eviction.
//!
//! Nodes live in a slab (`Vec`) and are linked by index; a `HashMap` maps each
//! key to its slot so that promoting an existing key never scans the list.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Most-recently-used list holding at most `capacity` entries.
#[derive(Debug)]
pub struct HotList<K, V> {
    slots: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    capacity: usize,
}

impl<K: Copy + Eq + Hash, V> HotList<K, V> {
    /// Create an empty list. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: HashMap::with_capacity(capacity + 1),
            nodes: Vec::with_capacity(capacity + 1),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Insert `key` or move it to the front.
    ///
    /// Returns the least recently used entry if the insertion pushed the list
    /// past its capacity. Promoting an existing key keeps its old value.
    pub fn touch(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.slots.get(&key) {
            self.unlink(slot);
            self.push_front(slot);
            return None;
        }

        let node = Node {
            key,
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.slots.insert(key, slot);
        self.push_front(slot);

        if self.slots.len() > self.capacity {
            self.pop_back()
        } else {
            None
        }
    }

    /// Remove the least recently used entry.
    pub fn pop_back(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let slot = self.tail;
        self.unlink(slot);
        let node = self.nodes[slot].take()?;
        self.slots.remove(&node.key);
        self.free.push(slot);
        Some((node.key, node.value))
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(node) = self.nodes.get(cursor).and_then(Option::as_ref) {
            keys.push(node.key);
            cursor = node.next;
        }
        keys
    }

    /// Remove every entry, least recently used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_back() {
            drained.push(entry);
        }
        self.nodes.clear();
        self.free.clear();
        drained
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K, V>> {
        self.nodes.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node_mut(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match self.node_mut(prev) {
            Some(node) => node.next = next,
            None => self.head = next,
        }
        match self.node_mut(next) {
            Some(node) => node.prev = prev,
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(slot) {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = NIL;
            node.next = old_head;
        }
        match self.node_mut(old_head) {
            Some(node) => node.prev = slot,
            None => self.tail = slot,
        }
        self.head = slot;
    }
}
