//! Growable collection of fixed-width records in one contiguous buffer.
//!
//! Records `[0, sort_bound)` are ordered by primary key, and distinct once
//! `uniq` or `remove_doubles` has run; records `[sort_bound, count)` form an
//! unordered tail. Appends
//! extend the ordered prefix when they arrive in key order, so bulk loads
//! of sorted data never pay for a sort.
//!
//! Exported layout (14 bytes of header, then the records):
//! - record count: 4 bytes, big-endian
//! - last read: 2 bytes, days since 2000-01-01
//! - last wrote: 2 bytes, days since 2000-01-01
//! - order signature: 2 ASCII bytes, `__` if none
//! - sort bound: 4 bytes, big-endian

use crate::sort::{sort_records, Layout, SortPool};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use rowstore_common::memory::{self, MemoryOracle};
use rowstore_common::{CollectionConfig, Result, StoreError};
use rowstore_row::{Cells, Entry, EntryView, Row};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Bytes of header in front of exported records.
pub const EXPORT_OVERHEAD: usize = 14;

const DAY_MS: i64 = 86_400_000;
/// Days from 1970-01-01 to 2000-01-01.
const DAYS_TO_2000: i64 = 10_957;
const NO_ORDER: &[u8; 2] = b"__";

#[derive(Clone)]
pub struct RowCollection {
    row: Arc<Row>,
    chunkcache: Vec<u8>,
    chunkcount: usize,
    sort_bound: usize,
    last_wrote: DateTime<Utc>,
    config: CollectionConfig,
    memory: Arc<dyn MemoryOracle>,
    pool: Arc<SortPool>,
}

impl RowCollection {
    /// An empty collection that allocates on first insert.
    pub fn new(row: Arc<Row>) -> Self {
        Self {
            row,
            chunkcache: Vec::new(),
            chunkcount: 0,
            sort_bound: 0,
            last_wrote: Utc::now(),
            config: CollectionConfig::default(),
            memory: memory::system(),
            pool: SortPool::global(),
        }
    }

    /// An empty collection with room for `objectcount` records.
    pub fn with_capacity(row: Arc<Row>, objectcount: usize) -> Result<Self> {
        let mut collection = Self::new(row);
        collection.ensure_size(objectcount)?;
        Ok(collection)
    }

    /// Applies `config` after checking it.
    pub fn with_config(mut self, config: CollectionConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Sorts on `pool` instead of the process-wide pool.
    pub fn with_sort_pool(mut self, pool: Arc<SortPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryOracle>) -> Self {
        self.memory = memory;
        self
    }

    /// An empty collection sharing this one's row, config, oracle and pool.
    pub fn empty_like(&self) -> Self {
        Self {
            row: Arc::clone(&self.row),
            chunkcache: Vec::new(),
            chunkcount: 0,
            sort_bound: 0,
            last_wrote: Utc::now(),
            config: self.config,
            memory: Arc::clone(&self.memory),
            pool: Arc::clone(&self.pool),
        }
    }

    /// Rebuilds a collection from `export_collection` output.
    ///
    /// Counts and sort bounds that exceed the payload are corrected with a
    /// warning. A signature for a different ordering is an error.
    pub fn from_exported(row: Arc<Row>, exported: &[u8]) -> Result<Self> {
        if exported.len() < EXPORT_OVERHEAD {
            return Err(StoreError::MalformedRecord(format!(
                "exported collection has {} bytes, header needs {EXPORT_OVERHEAD}",
                exported.len()
            )));
        }
        let (mut header, payload) = exported.split_at(EXPORT_OVERHEAD);
        let mut count = header.get_u32() as usize;
        let _last_read = header.get_u16();
        let last_wrote = header.get_u16();
        let mut signature = [0u8; 2];
        header.copy_to_slice(&mut signature);
        let mut sort_bound = header.get_u32() as usize;

        let expected = row.order().signature();
        if &signature != NO_ORDER && signature != expected.as_bytes() {
            return Err(StoreError::OrderMismatch {
                expected: expected.to_string(),
                actual: String::from_utf8_lossy(&signature).into_owned(),
            });
        }
        if &signature == NO_ORDER {
            sort_bound = 0;
        }

        let objectsize = row.objectsize();
        if payload.len() % objectsize != 0 {
            warn!(
                payload = payload.len(),
                objectsize, "exported collection is not record aligned"
            );
        }
        let available = payload.len() / objectsize;
        if count > available {
            warn!(count, available, "exported collection count corrected");
            count = available;
        }
        if sort_bound > count {
            warn!(sort_bound, count, "exported collection sort bound corrected");
            sort_bound = count;
        }

        let mut collection = Self::new(row);
        let needed = count * objectsize;
        if !collection.memory.request(needed as u64) {
            return Err(StoreError::resource_exceeded(
                needed as u64,
                collection.memory.available(),
            ));
        }
        collection.chunkcache = payload[..needed].to_vec();
        collection.chunkcount = count;
        collection.sort_bound = sort_bound;
        collection.last_wrote = from_days_since_2000(last_wrote);
        Ok(collection)
    }

    /// Reads the record count from an exported collection's header.
    pub fn exported_size(exported: &[u8]) -> Option<usize> {
        if exported.len() < EXPORT_OVERHEAD {
            return None;
        }
        let mut header = exported;
        Some(header.get_u32() as usize)
    }

    /// Sorts, then serializes header and records.
    pub fn export_collection(&mut self) -> Bytes {
        self.sort();
        let used = self.chunkcount * self.row.objectsize();
        let mut buf = BytesMut::with_capacity(EXPORT_OVERHEAD + used);
        buf.put_u32(self.chunkcount as u32);
        buf.put_u16(days_since_2000(Utc::now()));
        buf.put_u16(days_since_2000(self.last_wrote));
        buf.put_slice(self.row.order().signature().as_bytes());
        buf.put_u32(self.sort_bound as u32);
        buf.put_slice(&self.chunkcache[..used]);
        buf.freeze()
    }

    pub fn save_collection(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let exported = self.export_collection();
        std::fs::write(path, &exported)?;
        Ok(())
    }

    pub fn row(&self) -> &Arc<Row> {
        &self.row
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.chunkcount
    }

    pub fn is_empty(&self) -> bool {
        self.chunkcount == 0
    }

    /// Length of the ordered prefix.
    pub fn sorted(&self) -> usize {
        self.sort_bound
    }

    pub fn is_sorted(&self) -> bool {
        self.chunkcount <= 1 || self.sort_bound == self.chunkcount
    }

    /// Allocated buffer size in bytes.
    pub fn mem(&self) -> usize {
        self.chunkcache.len()
    }

    pub fn last_wrote(&self) -> DateTime<Utc> {
        self.last_wrote
    }

    /// Bytes the next grow step would allocate.
    pub fn memory_needed_for_grow(&self) -> u64 {
        (self.chunkcount as u64 + 1)
            * self.row.objectsize() as u64
            * self.config.growth_large_percent
            / 100
    }

    fn ensure_size(&mut self, elements: usize) -> Result<()> {
        let needed = elements * self.row.objectsize();
        if self.chunkcache.len() >= needed {
            return Ok(());
        }
        let allocation = self.grow_allocation(needed as u64)? as usize;
        let additional = allocation - self.chunkcache.len();
        if self.chunkcache.try_reserve_exact(additional).is_err() {
            return Err(StoreError::resource_exceeded(
                allocation as u64,
                self.memory.available(),
            ));
        }
        self.chunkcache.resize(allocation, 0);
        Ok(())
    }

    /// Picks the largest acceptable allocation of at least `needed` bytes.
    fn grow_allocation(&self, needed: u64) -> Result<u64> {
        let objectsize = self.row.objectsize() as u64;
        let round = |bytes: u64| (bytes / objectsize * objectsize).max(needed);
        let large = round(
            self.config
                .min_allocation
                .max(needed * self.config.growth_large_percent / 100),
        );
        let small = round(needed * self.config.growth_small_percent / 100);
        [large, small, needed]
            .into_iter()
            .find(|&candidate| self.memory.request(candidate))
            .ok_or_else(|| {
                let available = self.memory.available();
                warn!(needed, available, "collection growth refused");
                StoreError::resource_exceeded(needed, available)
            })
    }

    /// Releases over-allocated buffer space.
    pub fn trim(&mut self) {
        let used = self.chunkcount * self.row.objectsize();
        if used < self.chunkcache.len() {
            self.chunkcache.truncate(used);
            self.chunkcache.shrink_to_fit();
        }
    }

    fn check_shrink(&mut self) {
        let used = self.chunkcount * self.row.objectsize();
        if (self.chunkcache.len() as u64) > self.config.min_allocation
            && used < self.chunkcache.len() / 2
        {
            self.trim();
        }
    }

    fn record(&self, index: usize) -> &[u8] {
        let size = self.row.objectsize();
        &self.chunkcache[index * size..(index + 1) * size]
    }

    pub(crate) fn record_mut(&mut self, index: usize) -> &mut [u8] {
        let size = self.row.objectsize();
        &mut self.chunkcache[index * size..(index + 1) * size]
    }

    pub fn key(&self, index: usize) -> Option<&[u8]> {
        (index < self.chunkcount)
            .then(|| &self.record(index)[..self.row.primary_key_length()])
    }

    pub fn get(&self, index: usize) -> Option<Entry> {
        self.view(index).map(|view| view.to_entry())
    }

    pub fn view(&self, index: usize) -> Option<EntryView<'_>> {
        if index >= self.chunkcount {
            return None;
        }
        self.row.view(self.record(index))
    }

    /// Compares the key at `index` with `key` in the row's order.
    pub(crate) fn compare_key(&self, index: usize, key: &[u8]) -> Ordering {
        let keylen = self.row.primary_key_length();
        self.row
            .order()
            .compare(&self.record(index)[..keylen], key)
    }

    fn check_record(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.row.objectsize() {
            return Err(StoreError::MalformedRecord(format!(
                "record has {} bytes, row needs {}",
                bytes.len(),
                self.row.objectsize()
            )));
        }
        Ok(())
    }

    /// Overwrites or appends the record at `index`. The ordered prefix
    /// shrinks to `index` if the key there changed.
    pub fn set(&mut self, index: usize, entry: &Entry) -> Result<()> {
        let bytes = entry.bytes();
        self.check_record(bytes)?;
        if index > self.chunkcount {
            return Err(StoreError::Internal(format!(
                "set at {index} beyond {} records",
                self.chunkcount
            )));
        }
        if index == self.chunkcount {
            return self.add_bytes(bytes);
        }
        let keylen = self.row.primary_key_length();
        let key_changed = self.record(index)[..keylen] != bytes[..keylen];
        self.record_mut(index).copy_from_slice(bytes);
        if key_changed && index < self.sort_bound {
            self.sort_bound = index;
        }
        self.last_wrote = Utc::now();
        Ok(())
    }

    /// Inserts at `index`, shifting later records up.
    pub fn insert_unique(&mut self, index: usize, entry: &Entry) -> Result<()> {
        let bytes = entry.bytes();
        self.check_record(bytes)?;
        if index >= self.chunkcount {
            return self.add_bytes(bytes);
        }
        self.ensure_size(self.chunkcount + 1)?;
        let size = self.row.objectsize();
        self.chunkcache
            .copy_within(index * size..self.chunkcount * size, (index + 1) * size);
        self.chunkcount += 1;
        self.record_mut(index).copy_from_slice(bytes);
        self.sort_bound = self.sort_bound.min(index);
        self.last_wrote = Utc::now();
        Ok(())
    }

    /// Appends a record whose key the caller guarantees is new.
    pub fn add_unique(&mut self, entry: &Entry) -> Result<()> {
        self.add_bytes(entry.bytes())
    }

    /// Appends raw record bytes.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_record(bytes)?;
        self.ensure_size(self.chunkcount + 1)?;
        let index = self.chunkcount;
        self.chunkcount += 1;
        self.record_mut(index).copy_from_slice(bytes);
        if self.chunkcount == 1 {
            self.sort_bound = 1;
        } else if self.sort_bound + 1 == self.chunkcount {
            let keylen = self.row.primary_key_length();
            let previous = &self.record(index - 1)[..keylen];
            if self.row.order().compare(previous, &bytes[..keylen]) == Ordering::Less {
                self.sort_bound = self.chunkcount;
            }
        }
        self.last_wrote = Utc::now();
        Ok(())
    }

    /// Appends a record the caller guarantees sorts after every present one.
    pub(crate) fn add_sorted(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_record(bytes)?;
        self.ensure_size(self.chunkcount + 1)?;
        let index = self.chunkcount;
        self.chunkcount += 1;
        self.record_mut(index).copy_from_slice(bytes);
        self.sort_bound = self.chunkcount;
        self.last_wrote = Utc::now();
        Ok(())
    }

    pub fn add_all_unique(&mut self, other: &RowCollection) -> Result<()> {
        if other.row.objectsize() != self.row.objectsize() {
            return Err(StoreError::MalformedRecord(
                "collections have different record sizes".into(),
            ));
        }
        if other.is_empty() {
            return Ok(());
        }
        let was_empty = self.is_empty();
        self.ensure_size(self.chunkcount + other.chunkcount)?;
        let size = self.row.objectsize();
        let start = self.chunkcount * size;
        let len = other.chunkcount * size;
        self.chunkcache[start..start + len].copy_from_slice(&other.chunkcache[..len]);
        self.chunkcount += other.chunkcount;
        if was_empty {
            self.sort_bound = other.sort_bound;
        }
        self.last_wrote = Utc::now();
        Ok(())
    }

    /// Removes the record at `index`.
    ///
    /// With `keep_order` and an index inside the ordered prefix, later
    /// records shift down. Otherwise the last record moves into the gap and
    /// the ordered prefix ends at `index`.
    pub fn remove_row(&mut self, index: usize, keep_order: bool) {
        if index >= self.chunkcount {
            return;
        }
        let size = self.row.objectsize();
        if keep_order && index < self.sort_bound {
            self.chunkcache
                .copy_within((index + 1) * size..self.chunkcount * size, index * size);
            self.sort_bound -= 1;
        } else {
            let last = self.chunkcount - 1;
            if index != last {
                self.chunkcache
                    .copy_within(last * size..(last + 1) * size, index * size);
            }
            self.sort_bound = self.sort_bound.min(index);
        }
        self.chunkcount -= 1;
        self.last_wrote = Utc::now();
        self.check_shrink();
    }

    /// Removes and returns the last record.
    pub fn remove_one(&mut self) -> Option<Entry> {
        let last = self.chunkcount.checked_sub(1)?;
        let entry = self.get(last);
        if self.chunkcount == self.sort_bound {
            self.sort_bound -= 1;
        }
        self.chunkcount -= 1;
        self.last_wrote = Utc::now();
        self.check_shrink();
        entry
    }

    /// Up to `n` records from the tail, last record first.
    pub fn top(&self, n: usize) -> Vec<Entry> {
        (0..self.chunkcount)
            .rev()
            .take(n)
            .filter_map(|i| self.get(i))
            .collect()
    }

    /// Up to `n` records spread evenly over the collection.
    pub fn random(&self, n: usize) -> Vec<Entry> {
        let n = n.min(self.chunkcount);
        if n == 0 {
            return Vec::new();
        }
        let step = self.chunkcount / n;
        (0..n).filter_map(|i| self.get(i * step)).collect()
    }

    pub fn smallest_key(&mut self) -> Option<Vec<u8>> {
        self.sort();
        self.key(0).map(<[u8]>::to_vec)
    }

    pub fn largest_key(&mut self) -> Option<Vec<u8>> {
        self.sort();
        self.key(self.chunkcount.checked_sub(1)?).map(<[u8]>::to_vec)
    }

    /// Views of all records in storage order.
    pub fn iter(&self) -> impl Iterator<Item = EntryView<'_>> + '_ {
        (0..self.chunkcount).filter_map(move |i| self.view(i))
    }

    /// Primary keys in storage order.
    pub fn keys_iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.chunkcount).filter_map(move |i| self.key(i))
    }

    pub fn clear(&mut self) {
        self.chunkcache = Vec::new();
        self.chunkcount = 0;
        self.sort_bound = 0;
        self.last_wrote = Utc::now();
    }

    /// Drops all records and the buffer without counting as a write.
    pub fn reset(&mut self) {
        self.chunkcache = Vec::new();
        self.chunkcount = 0;
        self.sort_bound = 0;
    }

    /// Sorts on this collection's worker pool.
    pub fn sort(&mut self) {
        let pool = Arc::clone(&self.pool);
        self.sort_with(&pool);
    }

    pub fn sort_with(&mut self, pool: &SortPool) {
        if self.sort_bound == self.chunkcount {
            return;
        }
        let layout = Layout {
            objectsize: self.row.objectsize(),
            keylen: self.row.primary_key_length(),
            order: self.row.order(),
            isort_limit: self.config.isort_limit,
        };
        sort_records(
            &mut self.chunkcache,
            self.chunkcount,
            self.sort_bound,
            layout,
            self.config.parallel_sort_threshold,
            pool,
        );
        self.sort_bound = self.chunkcount;
    }

    pub fn optimize(&mut self) {
        self.sort();
        self.trim();
    }

    /// Sorts and drops records whose key equals the previous record's,
    /// keeping the first occurrence.
    pub fn uniq(&mut self) {
        self.sort();
        if self.chunkcount < 2 {
            return;
        }
        let size = self.row.objectsize();
        let keylen = self.row.primary_key_length();
        let mut kept = 1;
        for i in 1..self.chunkcount {
            let duplicate =
                self.chunkcache[i * size..i * size + keylen] == self.chunkcache[(kept - 1) * size..(kept - 1) * size + keylen];
            if !duplicate {
                if kept != i {
                    self.chunkcache
                        .copy_within(i * size..(i + 1) * size, kept * size);
                }
                kept += 1;
            }
        }
        if kept != self.chunkcount {
            self.chunkcount = kept;
            self.sort_bound = kept;
            self.last_wrote = Utc::now();
            self.check_shrink();
        }
    }

    /// Sorts and removes duplicated keys, keeping one record per key.
    /// Returns one collection per duplicated key holding the removed extras.
    pub fn remove_doubles(&mut self) -> Result<Vec<RowCollection>> {
        self.sort();
        let mut report = Vec::new();
        if self.chunkcount < 2 {
            return Ok(report);
        }
        let size = self.row.objectsize();
        let keylen = self.row.primary_key_length();
        let mut group: Option<RowCollection> = None;
        let mut kept = 1;
        for i in 1..self.chunkcount {
            let current = i * size;
            let previous = (kept - 1) * size;
            if self.chunkcache[current..current + keylen]
                == self.chunkcache[previous..previous + keylen]
            {
                let extras = group.get_or_insert_with(|| self.empty_like());
                extras.add_sorted(&self.chunkcache[current..current + size])?;
                continue;
            }
            if let Some(mut extras) = group.take() {
                extras.trim();
                report.push(extras);
            }
            if kept != i {
                self.chunkcache
                    .copy_within(current..current + size, kept * size);
            }
            kept += 1;
        }
        if let Some(mut extras) = group.take() {
            extras.trim();
            report.push(extras);
        }
        if kept != self.chunkcount {
            self.chunkcount = kept;
            self.sort_bound = kept;
            self.last_wrote = Utc::now();
            self.check_shrink();
        }
        Ok(report)
    }
}

impl fmt::Debug for RowCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCollection")
            .field("count", &self.chunkcount)
            .field("sort_bound", &self.sort_bound)
            .field("mem", &self.chunkcache.len())
            .field("order", &self.row.order())
            .finish()
    }
}

fn days_since_2000(time: DateTime<Utc>) -> u16 {
    (time.timestamp_millis() / DAY_MS - DAYS_TO_2000).clamp(0, u16::MAX as i64) as u16
}

fn from_days_since_2000(days: u16) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((days as i64 + DAYS_TO_2000) * DAY_MS)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
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

    fn keys(c: &RowCollection) -> Vec<Vec<u8>> {
        c.keys_iter().map(<[u8]>::to_vec).collect()
    }

    #[test]
    fn test_add_in_order_extends_sort_bound() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        c.add_unique(&entry(&row, b"aaaa", 1)).unwrap();
        assert_eq!(c.sorted(), 1);
        c.add_unique(&entry(&row, b"bbbb", 2)).unwrap();
        assert_eq!(c.sorted(), 2);
        c.add_unique(&entry(&row, b"abcd", 3)).unwrap();
        assert_eq!(c.sorted(), 2);
        c.add_unique(&entry(&row, b"zzzz", 4)).unwrap();
        assert_eq!(c.sorted(), 2);
        assert_eq!(c.size(), 4);
        assert!(!c.is_sorted());
    }

    #[test]
    fn test_equal_key_append_breaks_sort_bound() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        c.add_unique(&entry(&row, b"aaaa", 1)).unwrap();
        c.add_unique(&entry(&row, b"aaaa", 2)).unwrap();
        assert_eq!(c.sorted(), 1);
    }

    #[test]
    fn test_sort_and_uniq() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for (k, v) in [(b"dddd", 1), (b"bbbb", 2), (b"dddd", 3), (b"aaaa", 4), (b"bbbb", 5)] {
            c.add_unique(&entry(&row, k, v)).unwrap();
        }
        c.sort();
        assert_eq!(c.sorted(), c.size());
        c.uniq();
        assert_eq!(keys(&c), vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"dddd".to_vec()]);
        assert_eq!(c.sorted(), 3);
    }

    #[test]
    fn test_set_lowers_sort_bound_on_key_change() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for k in [b"aaaa", b"bbbb", b"cccc"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        assert_eq!(c.sorted(), 3);

        // same key, new value: order untouched
        c.set(1, &entry(&row, b"bbbb", 9)).unwrap();
        assert_eq!(c.sorted(), 3);
        assert_eq!(c.get(1).unwrap().col_long(1).unwrap(), 9);

        c.set(1, &entry(&row, b"zzzz", 0)).unwrap();
        assert_eq!(c.sorted(), 1);

        // index == size appends
        c.set(3, &entry(&row, b"dddd", 0)).unwrap();
        assert_eq!(c.size(), 4);
        assert!(c.set(9, &entry(&row, b"eeee", 0)).is_err());
    }

    #[test]
    fn test_remove_row_keep_order() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for k in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        c.remove_row(1, true);
        assert_eq!(keys(&c), vec![b"aaaa".to_vec(), b"cccc".to_vec(), b"dddd".to_vec()]);
        assert_eq!(c.sorted(), 3);

        c.remove_row(0, false);
        assert_eq!(keys(&c), vec![b"dddd".to_vec(), b"cccc".to_vec()]);
        assert_eq!(c.sorted(), 0);
        assert!(c.sorted() <= c.size());
    }

    #[test]
    fn test_remove_one_and_top() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for k in [b"aaaa", b"bbbb", b"cccc"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        let top: Vec<Vec<u8>> = c.top(2).iter().map(|e| e.primary_key().to_vec()).collect();
        assert_eq!(top, vec![b"cccc".to_vec(), b"bbbb".to_vec()]);

        assert_eq!(c.remove_one().unwrap().primary_key(), b"cccc");
        assert_eq!(c.sorted(), 2);
        assert_eq!(c.size(), 2);
        c.remove_one();
        c.remove_one();
        assert!(c.remove_one().is_none());
        assert_eq!(c.sorted(), 0);
    }

    #[test]
    fn test_random_spreads_samples() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for i in 0u32..10 {
            c.add_unique(&entry(&row, &i.to_be_bytes(), 0)).unwrap();
        }
        let sample = c.random(5);
        assert_eq!(sample.len(), 5);
        assert_eq!(sample[1].primary_key(), 2u32.to_be_bytes());
        assert!(c.random(0).is_empty());
        assert_eq!(c.random(50).len(), 10);
    }

    #[test]
    fn test_smallest_and_largest_key() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        assert!(c.smallest_key().is_none());
        for k in [b"mmmm", b"aaaa", b"zzzz"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        assert_eq!(c.smallest_key().unwrap(), b"aaaa");
        assert_eq!(c.largest_key().unwrap(), b"zzzz");
    }

    #[test]
    fn test_remove_doubles_keeps_one_per_key() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for (k, v) in [(b"bbbb", 1), (b"aaaa", 0), (b"bbbb", 2), (b"cccc", 0), (b"bbbb", 3)] {
            c.add_unique(&entry(&row, k, v)).unwrap();
        }
        let report = c.remove_doubles().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].size(), 2);
        assert!(report[0].keys_iter().all(|k| k == b"bbbb"));
        assert_eq!(keys(&c), vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]);
        assert!(c.is_sorted());
    }

    #[test]
    fn test_remove_doubles_multiple_groups() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for k in [b"aaaa", b"aaaa", b"bbbb", b"cccc", b"cccc", b"cccc"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        let report = c.remove_doubles().unwrap();
        let sizes: Vec<usize> = report.iter().map(RowCollection::size).collect();
        assert_eq!(sizes, vec![1, 2]);
        assert_eq!(c.size(), 3);
    }

    #[test]
    fn test_export_import() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for (k, v) in [(b"cccc", 3), (b"aaaa", 1), (b"bbbb", 2)] {
            c.add_unique(&entry(&row, k, v)).unwrap();
        }
        let exported = c.export_collection();
        assert_eq!(exported.len(), EXPORT_OVERHEAD + 3 * 8);
        assert_eq!(RowCollection::exported_size(&exported), Some(3));
        assert_eq!(&exported[8..10], b"nu");

        let imported = RowCollection::from_exported(row.clone(), &exported).unwrap();
        assert_eq!(imported.size(), 3);
        assert_eq!(imported.sorted(), 3);
        assert_eq!(keys(&imported), keys(&c));
        assert_eq!(imported.get(2).unwrap().col_long(1).unwrap(), 3);
        assert_eq!(
            imported.last_wrote().timestamp() / 86_400,
            c.last_wrote().timestamp() / 86_400
        );
    }

    #[test]
    fn test_import_corrects_count_and_bound() {
        let row = row();
        let mut exported = BytesMut::new();
        exported.put_u32(10);
        exported.put_u16(0);
        exported.put_u16(0);
        exported.put_slice(b"nu");
        exported.put_u32(20);
        exported.put_slice(b"aaaa\0\0\0\x01bbbb\0\0\0\x02xx");

        let c = RowCollection::from_exported(row, &exported).unwrap();
        assert_eq!(c.size(), 2);
        assert_eq!(c.sorted(), 2);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let row = row();
        assert!(matches!(
            RowCollection::from_exported(row.clone(), b"short"),
            Err(StoreError::MalformedRecord(_))
        ));

        let other = Arc::new(Row::parse("byte[] key-4, long v-4 {b256}", ByteOrder::BASE64).unwrap());
        let mut c = RowCollection::new(other.clone());
        c.add_unique(&entry(&other, b"AAAA", 1)).unwrap();
        let exported = c.export_collection();
        assert!(matches!(
            RowCollection::from_exported(row, &exported),
            Err(StoreError::OrderMismatch { .. })
        ));
    }

    #[test]
    fn test_growth_policy_falls_back() {
        let row = row();
        let memory = Arc::new(FixedMemory::new(800));
        let mut c = RowCollection::new(row.clone()).with_memory(memory.clone());
        // 100 records need 800 bytes: the 140% and 120% steps are refused
        for i in 0u32..100 {
            c.add_unique(&entry(&row, &i.to_be_bytes(), 0)).unwrap();
        }
        assert!(c.mem() <= 800);

        memory.set_available(0);
        let err = c.add_unique(&entry(&row, b"zzzz", 0)).unwrap_err();
        match err {
            StoreError::ResourceExceeded { needed, available, .. } => {
                assert_eq!(needed, 808);
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(c.size(), 100);
    }

    #[test]
    fn test_growth_uses_large_step() {
        let row = row();
        let mut c = RowCollection::new(row.clone()).with_memory(Arc::new(FixedMemory::unlimited()));
        c.add_unique(&entry(&row, b"aaaa", 0)).unwrap();
        assert_eq!(c.mem(), 1024);
        assert_eq!(c.memory_needed_for_grow(), 2 * 8 * 140 / 100);
    }

    #[test]
    fn test_trim_and_clear() {
        let row = row();
        let mut c = RowCollection::with_capacity(row.clone(), 100).unwrap();
        c.add_unique(&entry(&row, b"aaaa", 0)).unwrap();
        assert!(c.mem() >= 800);
        c.trim();
        assert_eq!(c.mem(), 8);
        c.clear();
        assert_eq!(c.size(), 0);
        assert_eq!(c.mem(), 0);
        assert_eq!(c.sorted(), 0);

        c.add_unique(&entry(&row, b"bbbb", 0)).unwrap();
        let wrote = c.last_wrote();
        c.reset();
        assert!(c.is_empty());
        assert_eq!(c.mem(), 0);
        assert_eq!(c.last_wrote(), wrote);
    }

    #[test]
    fn test_insert_unique_shifts() {
        let row = row();
        let mut c = RowCollection::new(row.clone());
        for k in [b"aaaa", b"cccc"] {
            c.add_unique(&entry(&row, k, 0)).unwrap();
        }
        c.insert_unique(1, &entry(&row, b"bbbb", 0)).unwrap();
        assert_eq!(keys(&c), vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]);
        assert_eq!(c.sorted(), 1);
    }

    #[test]
    fn test_add_all_unique() {
        let row = row();
        let mut a = RowCollection::new(row.clone());
        let mut b = RowCollection::new(row.clone());
        a.add_unique(&entry(&row, b"aaaa", 0)).unwrap();
        b.add_unique(&entry(&row, b"bbbb", 0)).unwrap();
        b.add_unique(&entry(&row, b"cccc", 0)).unwrap();
        a.add_all_unique(&b).unwrap();
        assert_eq!(a.size(), 3);
        assert!(a.sorted() <= a.size());
    }

    #[test]
    fn test_rejects_wrong_record_size() {
        let row = row();
        let mut c = RowCollection::new(row);
        assert!(matches!(
            c.add_bytes(b"abc"),
            Err(StoreError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_large_parallel_sort_then_uniq() {
        let row = row();
        let mut rng = StdRng::seed_from_u64(99);
        let mut c = RowCollection::new(row.clone()).with_memory(Arc::new(FixedMemory::unlimited()));
        for _ in 0..20_000 {
            let k: u32 = rng.gen_range(0..15_000);
            c.add_unique(&entry(&row, &k.to_be_bytes(), 0)).unwrap();
        }
        c.sort_with(&SortPool::new(4));
        assert!(c.is_sorted());
        c.uniq();
        let keys = keys(&c);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(c.sorted() <= c.size());
    }

    #[test]
    fn test_sort_then_uniq_few_distinct_keys() {
        let row = row();
        let one_byte = Arc::new(Row::parse("byte[] key-1", ByteOrder::NATURAL).unwrap());
        let mut c = RowCollection::new(one_byte.clone());
        for i in 0..21 {
            c.add_bytes(&[b"abc"[i % 3]]).unwrap();
        }
        c.sort();
        assert!(c.is_sorted());
        assert!(keys(&c).windows(2).all(|w| w[0] <= w[1]));
        c.uniq();
        assert_eq!(keys(&c), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(c.sorted(), 3);

        let mut rng = StdRng::seed_from_u64(5);
        let mut c = RowCollection::new(row.clone()).with_memory(Arc::new(FixedMemory::unlimited()));
        for _ in 0..12_000 {
            let k: u32 = rng.gen_range(0..7);
            c.add_unique(&entry(&row, &k.to_be_bytes(), 0)).unwrap();
        }
        c.sort_with(&SortPool::new(4));
        c.uniq();
        let expected: Vec<Vec<u8>> = (0u32..7).map(|k| k.to_be_bytes().to_vec()).collect();
        assert_eq!(keys(&c), expected);
        assert_eq!(c.sorted(), 7);
    }

    #[test]
    fn test_with_config_validates() {
        let row = row();
        let bad = CollectionConfig {
            isort_limit: 1,
            ..CollectionConfig::default()
        };
        assert!(matches!(
            RowCollection::new(row.clone()).with_config(bad),
            Err(StoreError::Config(_))
        ));
        let good = CollectionConfig {
            isort_limit: 4,
            ..CollectionConfig::default()
        };
        let c = RowCollection::new(row).with_config(good).unwrap();
        assert_eq!(c.config().isort_limit, 4);
    }

    #[test]
    fn test_save_collection() {
        let row = row();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.bin");
        let mut c = RowCollection::new(row.clone());
        c.add_unique(&entry(&row, b"aaaa", 5)).unwrap();
        c.save_collection(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let restored = RowCollection::from_exported(row, &bytes).unwrap();
        assert_eq!(restored.get(0).unwrap().col_long(1).unwrap(), 5);
    }
}
