//! Read cache in front of any `Index`.
//!
//! Two `RowSet`s sit under one lock: a hit cache holding copies of records
//! read or written, and a miss cache holding keys known to be absent.
//! Writes go through to the backend synchronously. Both caches give way
//! under memory pressure by being cleared outright.

use crate::collection::RowCollection;
use crate::index::{Index, KeyIter, RowIter};
use crate::rowset::RowSet;
use parking_lot::Mutex;
use rowstore_common::memory::{self, MemoryOracle};
use rowstore_common::{CacheConfig, Result};
use rowstore_row::{Cells, Entry, Row};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the hit cache.
    pub read_hits: u64,
    /// Reads the hit cache could not answer.
    pub read_misses: u64,
    /// Records added to the hit cache.
    pub write_unique: u64,
    /// Hit cache records overwritten.
    pub write_double: u64,
    /// Records dropped from the hit cache by deletes.
    pub deletes: u64,
    /// Times a cache was cleared to free memory.
    pub flushes: u64,
    /// Reads answered as absent from the miss cache.
    pub miss_hits: u64,
    /// Reads the miss cache could not answer.
    pub miss_misses: u64,
    /// Keys added to the miss cache.
    pub miss_unique: u64,
    /// Miss cache keys recorded again.
    pub miss_double: u64,
    /// Keys dropped from the miss cache by writes.
    pub miss_deletes: u64,
}

struct CacheState {
    hit: RowSet,
    miss: RowSet,
    stats: CacheStats,
}

impl CacheState {
    fn clear(&mut self) {
        self.hit.clear();
        self.miss.clear();
    }
}

pub struct Cache<I: Index> {
    backend: I,
    config: CacheConfig,
    memory: Arc<dyn MemoryOracle>,
    keyrow: Arc<Row>,
    state: Mutex<CacheState>,
}

impl<I: Index> Cache<I> {
    pub fn new(backend: I, config: CacheConfig) -> Self {
        Self::with_memory(backend, config, memory::system())
    }

    /// A cache whose admission and growth consult `memory`.
    pub fn with_memory(backend: I, config: CacheConfig, memory: Arc<dyn MemoryOracle>) -> Self {
        let row = backend.row().clone();
        let keyrow = Arc::new(row.key_row());
        let state = CacheState {
            hit: RowSet::new(row).with_memory(Arc::clone(&memory)),
            miss: RowSet::new(keyrow.clone()).with_memory(Arc::clone(&memory)),
            stats: CacheStats::default(),
        };
        Self {
            backend,
            config,
            memory,
            keyrow,
            state: Mutex::new(state),
        }
    }

    pub fn backend(&self) -> &I {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Records held in the hit cache.
    pub fn hit_cache_size(&self) -> usize {
        self.state.lock().hit.size()
    }

    /// Keys held in the miss cache.
    pub fn miss_cache_size(&self) -> usize {
        self.state.lock().miss.size()
    }

    /// Empties both caches. The backend is untouched.
    pub fn clear_cache(&self) {
        self.state.lock().clear();
    }

    /// Decides whether `set` may take one more record. Clears it first when
    /// memory runs short.
    fn has_room(&self, set: &mut RowSet, limit: usize, flushes: &mut u64) -> bool {
        if limit > 0 && set.size() >= limit {
            return false;
        }
        let headroom = self.config.headroom_bytes;
        let available = self.memory.available();
        if available < self.config.mem_start_shrink
            || available.saturating_sub(headroom) < set.memory_needed_for_grow()
        {
            if !set.is_empty() {
                debug!(records = set.size(), available, "cache cleared under memory pressure");
                set.clear();
                *flushes += 1;
            }
        }
        let available = self.memory.available();
        available >= self.config.mem_stop_grow
            && available.saturating_sub(headroom) > set.memory_needed_for_grow()
    }

    /// Caches a copy of `entry`. A cached copy of the key is always
    /// overwritten; admission only decides whether a new key gets in.
    fn learn_hit(&self, state: &mut CacheState, entry: &Entry) {
        let CacheState { hit, stats, .. } = &mut *state;
        if !hit.has(entry.primary_key())
            && !self.has_room(hit, self.config.hit_limit, &mut stats.flushes)
        {
            return;
        }
        match hit.replace(entry) {
            Ok(None) => stats.write_unique += 1,
            Ok(Some(_)) => stats.write_double += 1,
            Err(e) => {
                warn!(error = %e, "hit cache write failed, clearing caches");
                state.clear();
            }
        }
    }

    fn learn_miss(&self, state: &mut CacheState, key: &[u8]) {
        if key.len() != self.keyrow.primary_key_length() {
            return;
        }
        let Some(absent) = self.keyrow.new_entry(key) else {
            return;
        };
        let CacheState { miss, stats, .. } = &mut *state;
        if !self.has_room(miss, self.config.miss_limit, &mut stats.flushes) {
            return;
        }
        match miss.replace(&absent) {
            Ok(None) => stats.miss_unique += 1,
            Ok(Some(_)) => stats.miss_double += 1,
            Err(e) => {
                warn!(error = %e, "miss cache write failed, clearing caches");
                state.clear();
            }
        }
    }

    /// Drops the hit cache copy of `key` and records it as absent. Called
    /// once the backend delete has succeeded.
    fn forget(&self, state: &mut CacheState, key: &[u8]) {
        if state.hit.delete(key) {
            state.stats.deletes += 1;
        }
        self.learn_miss(state, key);
    }

    /// Runs a backend write, retrying once with empty caches if the
    /// backend ran out of memory.
    fn write_through<T>(&self, state: &mut CacheState, op: impl Fn(&I) -> Result<T>) -> Result<T> {
        match op(&self.backend) {
            Err(e) if e.is_resource_exceeded() => {
                warn!(error = %e, "backend write refused, retrying with empty caches");
                state.clear();
                op(&self.backend)
            }
            other => other,
        }
    }
}

impl<I: Index> Index for Cache<I> {
    fn filename(&self) -> Option<String> {
        self.backend.filename()
    }

    fn size(&self) -> usize {
        self.backend.size()
    }

    fn row(&self) -> &Arc<Row> {
        self.backend.row()
    }

    fn has(&self, key: &[u8]) -> bool {
        let mut state = self.state.lock();
        if state.miss.has(key) {
            state.stats.miss_hits += 1;
            return false;
        }
        state.stats.miss_misses += 1;
        if state.hit.has(key) {
            state.stats.read_hits += 1;
            return true;
        }
        state.stats.read_misses += 1;
        let found = self.backend.has(key);
        if !found {
            self.learn_miss(&mut state, key);
        }
        found
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        if state.miss.has(key) {
            state.stats.miss_hits += 1;
            return Ok(None);
        }
        state.stats.miss_misses += 1;
        if let Some(entry) = state.hit.get(key) {
            state.stats.read_hits += 1;
            return Ok(Some(entry));
        }
        state.stats.read_misses += 1;
        match self.backend.get(key)? {
            Some(entry) => {
                self.learn_hit(&mut state, &entry);
                Ok(Some(entry))
            }
            None => {
                self.learn_miss(&mut state, key);
                Ok(None)
            }
        }
    }

    fn put(&self, entry: &Entry) -> Result<bool> {
        let mut state = self.state.lock();
        if state.miss.delete(entry.primary_key()) {
            state.stats.miss_deletes += 1;
        }
        let created = self.write_through(&mut state, |backend| backend.put(entry))?;
        self.learn_hit(&mut state, entry);
        Ok(created)
    }

    fn add_unique(&self, entry: &Entry) -> Result<()> {
        let mut state = self.state.lock();
        if state.miss.delete(entry.primary_key()) {
            state.stats.miss_deletes += 1;
        }
        self.write_through(&mut state, |backend| backend.add_unique(entry))?;
        self.learn_hit(&mut state, entry);
        Ok(())
    }

    fn replace(&self, entry: &Entry) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        if state.miss.delete(entry.primary_key()) {
            state.stats.miss_deletes += 1;
            self.write_through(&mut state, |backend| backend.put(entry))?;
            self.learn_hit(&mut state, entry);
            return Ok(None);
        }
        let old = self.write_through(&mut state, |backend| backend.replace(entry))?;
        self.learn_hit(&mut state, entry);
        Ok(old)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        let removed = self.backend.remove(key)?;
        self.forget(&mut state, key);
        Ok(removed)
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut state = self.state.lock();
        let deleted = self.backend.delete(key)?;
        self.forget(&mut state, key);
        Ok(deleted)
    }

    fn remove_one(&self) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        let removed = self.backend.remove_one()?;
        if let Some(entry) = &removed {
            self.forget(&mut state, entry.primary_key());
        }
        Ok(removed)
    }

    fn remove_doubles(&self) -> Result<Vec<RowCollection>> {
        let _state = self.state.lock();
        self.backend.remove_doubles()
    }

    fn top(&self, n: usize) -> Result<Vec<Entry>> {
        self.backend.top(n)
    }

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        self.backend.keys(up, first)
    }

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter> {
        self.backend.rows(up, first)
    }

    fn smallest_key(&self) -> Option<Vec<u8>> {
        self.backend.smallest_key()
    }

    fn largest_key(&self) -> Option<Vec<u8>> {
        self.backend.largest_key()
    }

    fn mem(&self) -> usize {
        let state = self.state.lock();
        self.backend.mem() + state.hit.mem() + state.miss.mem()
    }

    fn optimize(&self) {
        let mut state = self.state.lock();
        self.backend.optimize();
        state.hit.optimize();
        state.miss.optimize();
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.clear();
        self.backend.clear()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.hit = state.hit.empty_like();
        state.miss = state.miss.empty_like();
        self.backend.close();
    }

    fn delete_on_exit(&self) {
        self.backend.delete_on_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::RamIndex;
    use rowstore_common::{ByteOrder, FixedMemory};

    fn row() -> Arc<Row> {
        Arc::new(Row::parse("byte[] key-4, long v-4 {b256}", ByteOrder::NATURAL).unwrap())
    }

    fn entry(row: &Arc<Row>, key: &[u8], value: i64) -> Entry {
        let mut e = row.new_entry_empty();
        e.set_col_bytes(0, key).unwrap();
        e.set_col_long(1, value).unwrap();
        e
    }

    fn cache_with(config: CacheConfig) -> (Arc<Row>, Arc<FixedMemory>, Cache<RamIndex>) {
        let row = row();
        let memory = Arc::new(FixedMemory::unlimited());
        let backend = RamIndex::new("backend", row.clone());
        let cache = Cache::with_memory(backend, config, memory.clone());
        (row, memory, cache)
    }

    #[test]
    fn test_get_populates_hit_cache() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        cache.backend().put(&entry(&row, b"aaaa", 7)).unwrap();

        assert_eq!(cache.get(b"aaaa").unwrap().unwrap().col_long(1).unwrap(), 7);
        assert_eq!(cache.hit_cache_size(), 1);
        assert_eq!(cache.stats().read_misses, 1);

        assert!(cache.get(b"aaaa").unwrap().is_some());
        assert_eq!(cache.stats().read_hits, 1);
    }

    #[test]
    fn test_get_populates_miss_cache() {
        let (_, _, cache) = cache_with(CacheConfig::default());
        assert!(cache.get(b"zzzz").unwrap().is_none());
        assert_eq!(cache.miss_cache_size(), 1);
        assert!(!cache.has(b"zzzz"));
        assert_eq!(cache.stats().miss_hits, 1);
    }

    #[test]
    fn test_put_clears_miss_and_writes_through() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        assert!(!cache.has(b"aaaa"));
        assert_eq!(cache.miss_cache_size(), 1);

        assert!(cache.put(&entry(&row, b"aaaa", 1)).unwrap());
        assert_eq!(cache.miss_cache_size(), 0);
        assert_eq!(cache.backend().size(), 1);
        assert!(cache.has(b"aaaa"));
        assert_eq!(cache.stats().miss_deletes, 1);

        assert!(!cache.put(&entry(&row, b"aaaa", 2)).unwrap());
        assert_eq!(cache.stats().write_double, 1);
        assert_eq!(cache.get(b"aaaa").unwrap().unwrap().col_long(1).unwrap(), 2);
    }

    #[test]
    fn test_replace_known_absent() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        cache.get(b"aaaa").unwrap();
        assert!(cache.replace(&entry(&row, b"aaaa", 1)).unwrap().is_none());
        let old = cache.replace(&entry(&row, b"aaaa", 2)).unwrap().unwrap();
        assert_eq!(old.col_long(1).unwrap(), 1);
    }

    #[test]
    fn test_remove_updates_both_caches() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        cache.put(&entry(&row, b"aaaa", 1)).unwrap();
        assert_eq!(cache.hit_cache_size(), 1);

        assert!(cache.remove(b"aaaa").unwrap().is_some());
        assert_eq!(cache.hit_cache_size(), 0);
        assert_eq!(cache.miss_cache_size(), 1);
        assert!(!cache.has(b"aaaa"));
        assert_eq!(cache.stats().deletes, 1);
        assert!(!cache.delete(b"aaaa").unwrap());
    }

    #[test]
    fn test_hit_limit() {
        let config = CacheConfig {
            hit_limit: 2,
            ..Default::default()
        };
        let (row, _, cache) = cache_with(config);
        for key in [b"aaaa", b"bbbb", b"cccc"] {
            cache.put(&entry(&row, key, 0)).unwrap();
        }
        assert_eq!(cache.hit_cache_size(), 2);
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_overwrite_when_hit_cache_full() {
        let config = CacheConfig {
            hit_limit: 1,
            ..Default::default()
        };
        let (row, _, cache) = cache_with(config);
        cache.put(&entry(&row, b"aaaa", 1)).unwrap();
        cache.put(&entry(&row, b"aaaa", 2)).unwrap();
        assert_eq!(cache.get(b"aaaa").unwrap().unwrap().col_long(1).unwrap(), 2);

        cache.put(&entry(&row, b"bbbb", 1)).unwrap();
        assert_eq!(cache.hit_cache_size(), 1);
        let old = cache.replace(&entry(&row, b"aaaa", 3)).unwrap().unwrap();
        assert_eq!(old.col_long(1).unwrap(), 2);
        assert_eq!(cache.get(b"aaaa").unwrap().unwrap().col_long(1).unwrap(), 3);
    }

    #[test]
    fn test_overwrite_when_admission_paused() {
        let (row, memory, cache) = cache_with(CacheConfig::default());
        cache.put(&entry(&row, b"aaaa", 1)).unwrap();

        // between the shrink and stop-grow thresholds
        memory.set_available(30 * 1024 * 1024);
        cache.put(&entry(&row, b"aaaa", 2)).unwrap();
        assert_eq!(cache.get(b"aaaa").unwrap().unwrap().col_long(1).unwrap(), 2);

        cache.put(&entry(&row, b"bbbb", 1)).unwrap();
        assert_eq!(cache.hit_cache_size(), 1);
        assert_eq!(cache.backend().size(), 2);
    }

    #[test]
    fn test_deletes_leave_read_stats_alone() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        cache.put(&entry(&row, b"aaaa", 1)).unwrap();
        cache.delete(b"aaaa").unwrap();
        cache.delete(b"bbbb").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.read_hits, 0);
        assert_eq!(stats.read_misses, 0);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_memory_pressure_clears_cache() {
        let (row, memory, cache) = cache_with(CacheConfig::default());
        cache.put(&entry(&row, b"aaaa", 0)).unwrap();
        assert_eq!(cache.hit_cache_size(), 1);

        memory.set_available(1024);
        cache.put(&entry(&row, b"bbbb", 0)).unwrap();
        assert_eq!(cache.hit_cache_size(), 0);
        assert_eq!(cache.stats().flushes, 1);
        assert_eq!(cache.backend().size(), 2);
        assert!(cache.get(b"aaaa").unwrap().is_some());
    }

    #[test]
    fn test_clear_cache_keeps_backend() {
        let (row, _, cache) = cache_with(CacheConfig::default());
        cache.put(&entry(&row, b"aaaa", 0)).unwrap();
        cache.get(b"bbbb").unwrap();
        cache.clear_cache();
        assert_eq!(cache.hit_cache_size(), 0);
        assert_eq!(cache.miss_cache_size(), 0);
        assert_eq!(cache.size(), 1);
    }
}
