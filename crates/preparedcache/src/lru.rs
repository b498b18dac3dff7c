//! LRU (Least Recently Used) store backing the prepared statement cache
//!
//! Entries live in a slab of nodes threaded on an intrusive doubly-linked
//! list, so lookup, touch and eviction are all O(1). The store itself is not
//! synchronized; `PreparedCache` wraps it in a mutex.

use std::collections::HashMap;
use std::hash::Hash;
use ahash::RandomState;

/// Node in the LRU doubly-linked list
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded map ordered by recency of use
///
/// `head` is the most recently used entry, `tail` the next eviction victim.
/// A capacity of zero is allowed and keeps the store empty.
pub struct LruStore<K, V> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
}

impl<K, V> LruStore<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a new store holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        // Don't preallocate for huge limits; the slab grows on demand.
        let initial = capacity.min(1024);

        Self {
            map: HashMap::with_capacity_and_hasher(initial, RandomState::new()),
            nodes: Vec::with_capacity(initial),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
        }
    }

    /// Get a value and mark it as most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            self.nodes[idx].as_ref().map(|node| &node.value)
        } else {
            None
        }
    }

    /// Get a value without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .and_then(|&idx| self.nodes[idx].as_ref())
            .map(|node| &node.value)
    }

    /// Check whether a key is present without touching its recency
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or overwrite a key, making it the most recently used entry
    ///
    /// Returns the entry evicted to make room, if any. With a capacity of
    /// zero that is the entry just inserted.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = &mut self.nodes[idx] {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }

        self.map.insert(key, idx);

        if self.map.len() > self.capacity {
            self.pop_oldest()
        } else {
            None
        }
    }

    /// Remove a key from the store
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free_node(idx);
        self.nodes[idx].take().map(|node| node.value)
    }

    /// Remove and return the least recently used entry
    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        let tail_idx = self.tail?;
        // Unlink before taking the node; unlink reads the node's neighbours.
        self.unlink(tail_idx);
        self.free_node(tail_idx);
        let node = self.nodes[tail_idx].take()?;
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Get the current number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Get the maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting oldest entries until the store fits.
    ///
    /// Returns the number of entries evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.map.len() > capacity {
            if self.pop_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        self.capacity = capacity;
        evicted
    }

    /// Evict every entry, oldest first. Returns the number evicted.
    pub fn clear(&mut self) -> usize {
        let mut evicted = 0;
        while self.pop_oldest().is_some() {
            evicted += 1;
        }
        self.nodes.clear();
        self.free_list.clear();
        evicted
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }
}
