use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

// Hash map + intrusive doubly-linked list over a slab, sentinel-free (head/tail are plain
// Option<usize> into the slab). We don't use any ordered-map's insertion order for recency
// because nothing guarantees O(1) move-to-front on top of one; the slab + explicit links do.
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<K, V> {
    capacity: usize,
    index: HashMap<K, usize>,
    slab: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    // front = most recently used, back = least recently used
    front: Option<usize>,
    back: Option<usize>,
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash,
{
    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.slab[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slab[p].as_mut().unwrap().next = next,
            None => self.front = next,
        }
        match next {
            Some(n) => self.slab[n].as_mut().unwrap().prev = prev,
            None => self.back = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_front = self.front;
        {
            let node = self.slab[idx].as_mut().unwrap();
            node.prev = None;
            node.next = old_front;
        }
        if let Some(f) = old_front {
            self.slab[f].as_mut().unwrap().prev = Some(idx);
        }
        self.front = Some(idx);
        if self.back.is_none() {
            self.back = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.front == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(node);
            idx
        } else {
            self.slab.push(Some(node));
            self.slab.len() - 1
        }
    }

    fn evict_back(&mut self) -> Option<(K, V)> {
        let idx = self.back?;
        self.detach(idx);
        let node = self.slab[idx].take().unwrap();
        self.index.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value))
    }

    fn remove_key(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.detach(idx);
        let node = self.slab[idx].take().unwrap();
        self.free.push(idx);
        Some(node.value)
    }
}

/// Outcome of a `put`: the value previously stored under the key (if any), and the
/// entry evicted to make room for this insert (if the map was at capacity).
pub struct PutOutcome<K, V> {
    pub previous: Option<V>,
    pub evicted: Option<(K, V)>,
}

/// Thread-safe LRU map. A `capacity` of zero is coerced to one.
pub struct LruMap<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> LruMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Inner {
                capacity,
                index: HashMap::new(),
                slab: Vec::new(),
                free: Vec::new(),
                front: None,
                back: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    pub fn size(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Promotes `key` to most-recently-used. Takes the write lock because recency changes.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();
        let idx = *inner.index.get(key)?;
        inner.touch(idx);
        Some(inner.slab[idx].as_ref().unwrap().value.clone())
    }

    /// Looks up `key` without changing recency order.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().index.contains_key(key)
    }

    /// Inserts or overwrites `key`. Overwriting promotes to MRU. Evicts the LRU entry
    /// if the insert grows the map past capacity.
    pub fn put(&self, key: K, value: V) -> PutOutcome<K, V> {
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.index.get(&key) {
            let previous = std::mem::replace(&mut inner.slab[idx].as_mut().unwrap().value, value);
            inner.touch(idx);
            return PutOutcome {
                previous: Some(previous),
                evicted: None,
            };
        }

        let idx = inner.alloc(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        inner.index.insert(key, idx);
        inner.push_front(idx);

        let evicted = if inner.index.len() > inner.capacity {
            inner.evict_back()
        } else {
            None
        };

        PutOutcome {
            previous: None,
            evicted,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().remove_key(key)
    }

    pub fn get_oldest(&self) -> Option<(K, V)> {
        let inner = self.inner.read();
        let idx = inner.back?;
        let node = inner.slab[idx].as_ref().unwrap();
        Some((node.key.clone(), node.value.clone()))
    }

    pub fn get_newest(&self) -> Option<(K, V)> {
        let inner = self.inner.read();
        let idx = inner.front?;
        let node = inner.slab[idx].as_ref().unwrap();
        Some((node.key.clone(), node.value.clone()))
    }

    /// Keys from most- to least-recently-used.
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.index.len());
        let mut cur = inner.front;
        while let Some(idx) = cur {
            let node = inner.slab[idx].as_ref().unwrap();
            out.push(node.key.clone());
            cur = node.next;
        }
        out
    }

    /// Walks from least- to most-recently-used, calling `f(key, value)`. Stops early when
    /// `f` returns `false`. Read-locked for the duration; `f` must not re-enter this map.
    pub fn iterate_oldest(&self, mut f: impl FnMut(&K, &V) -> bool) {
        let inner = self.inner.read();
        let mut cur = inner.back;
        while let Some(idx) = cur {
            let node = inner.slab[idx].as_ref().unwrap();
            if !f(&node.key, &node.value) {
                break;
            }
            cur = node.prev;
        }
    }

    /// Walks every entry in oldest-to-newest order, calling `f(key, value)`. Stops early
    /// when `f` returns `false`. Functionally identical to `iterate_oldest`; kept as a
    /// separate name for callers that don't care about order but do care about full
    /// coverage semantics.
    pub fn iterate_all(&self, f: impl FnMut(&K, &V) -> bool) {
        self.iterate_oldest(f);
    }
}
