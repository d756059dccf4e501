//! Two-generation caches with promotion on re-read.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Trait for bounded key-value caches.
pub trait AdaptiveCache<K, V>: Send + Sync {
    /// Returns a copy of the cached value, promoting it if it was seen only once.
    fn get(&self, key: &K) -> Option<V>;

    /// Stores a value, replacing any cached value for the key.
    fn put(&self, key: K, value: V);

    /// Returns true if the key is cached in either generation.
    fn contains_key(&self, key: &K) -> bool;

    /// Removes the key and returns its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Drops every entry.
    fn clear(&self);

    /// Number of cached entries.
    fn len(&self) -> usize;

    /// Returns true if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nominal capacity over both generations.
    fn capacity(&self) -> usize;
}

/// Cache with a generation for entries seen once and one for entries seen again.
///
/// New keys land in generation A. A read hit in A moves the entry to B, so
/// keys that are read back survive a stream of one-shot inserts. Each
/// generation holds half the capacity and evicts its oldest entry once it
/// has grown past that bound. Age is insertion order unless access order
/// is enabled with `with_access_order`.
pub struct SimpleArc<K, V> {
    /// Both generations, guarded together.
    inner: Mutex<SimpleArcInner<K, V>>,
    capacity: usize,
    access_order: bool,
}

struct SimpleArcInner<K, V> {
    /// Entries inserted but not yet read back.
    a: LruCache<K, V>,
    /// Entries promoted by a read hit.
    b: LruCache<K, V>,
    /// Per-generation bound.
    bound: usize,
}

impl<K: Hash + Eq, V> SimpleArcInner<K, V> {
    fn make_room(gen: &mut LruCache<K, V>, bound: usize) {
        while gen.len() > bound {
            if gen.pop_lru().is_none() {
                break;
            }
        }
    }
}

impl<K: Hash + Eq, V: Clone> SimpleArc<K, V> {
    /// Creates a cache holding about `capacity` entries, split evenly between generations.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SimpleArcInner {
                a: LruCache::unbounded(),
                b: LruCache::unbounded(),
                bound: (capacity / 2).max(1),
            }),
            capacity,
            access_order: false,
        }
    }

    /// Ages entries by last access instead of insertion.
    pub fn with_access_order(mut self) -> Self {
        self.access_order = true;
        self
    }

    /// Number of entries in (generation A, generation B).
    pub fn generation_sizes(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.a.len(), inner.b.len())
    }
}

impl<K, V> AdaptiveCache<K, V> for SimpleArc<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let hit = if self.access_order {
            inner.b.get(key).cloned()
        } else {
            inner.b.peek(key).cloned()
        };
        if hit.is_some() {
            return hit;
        }
        let (key, value) = inner.a.pop_entry(key)?;
        let bound = inner.bound;
        SimpleArcInner::make_room(&mut inner.b, bound);
        inner.b.put(key, value.clone());
        Some(value)
    }

    fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if inner.b.contains(&key) {
            if self.access_order {
                inner.b.put(key, value);
            } else if let Some(slot) = inner.b.peek_mut(&key) {
                *slot = value;
            }
            return;
        }
        if inner.a.contains(&key) {
            if self.access_order {
                inner.a.put(key, value);
            } else if let Some(slot) = inner.a.peek_mut(&key) {
                *slot = value;
            }
            return;
        }
        let bound = inner.bound;
        SimpleArcInner::make_room(&mut inner.a, bound);
        inner.a.put(key, value);
    }

    fn contains_key(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        inner.b.contains(key) || inner.a.contains(key)
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let from_b = inner.b.pop(key);
        let from_a = inner.a.pop(key);
        from_b.or(from_a)
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.a.clear();
        inner.b.clear();
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.a.len() + inner.b.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// `SimpleArc` split into hash partitions, each behind its own lock.
pub struct ConcurrentArc<K, V> {
    partitions: Vec<SimpleArc<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq, V: Clone> ConcurrentArc<K, V> {
    /// Creates `partitions` caches sharing `capacity` between them.
    pub fn new(capacity: usize, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let each = capacity.div_ceil(partitions);
        Self {
            partitions: (0..partitions).map(|_| SimpleArc::new(each)).collect(),
            capacity,
        }
    }

    /// Creates a cache with one partition per available CPU.
    pub fn with_cpu_partitions(capacity: usize) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(capacity, cpus)
    }

    /// Ages entries by last access in every partition.
    pub fn with_access_order(self) -> Self {
        Self {
            partitions: self
                .partitions
                .into_iter()
                .map(SimpleArc::with_access_order)
                .collect(),
            capacity: self.capacity,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition(&self, key: &K) -> &SimpleArc<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.partitions.len() as u64) as usize;
        &self.partitions[idx]
    }
}

impl<K, V> AdaptiveCache<K, V> for ConcurrentArc<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.partition(key).get(key)
    }

    fn put(&self, key: K, value: V) {
        self.partition(&key).put(key, value);
    }

    fn contains_key(&self, key: &K) -> bool {
        self.partition(key).contains_key(key)
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.partition(key).remove(key)
    }

    fn clear(&self) {
        for p in &self.partitions {
            p.clear();
        }
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
