//! Keyed set of records on top of a `RowCollection`.
//!
//! Lookups binary-search the ordered prefix and then scan the unordered
//! tail. Once the tail grows past the configured re-sort limit, the next
//! lookup sorts the whole collection first.

use crate::collection::RowCollection;
use crate::sort::SortPool;
use rowstore_common::memory::MemoryOracle;
use rowstore_common::{CollectionConfig, Result};
use rowstore_row::{Cells, Entry, EntryView, Row};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RowSet {
    collection: RowCollection,
}

impl RowSet {
    pub fn new(row: Arc<Row>) -> Self {
        Self {
            collection: RowCollection::new(row),
        }
    }

    pub fn with_capacity(row: Arc<Row>, objectcount: usize) -> Result<Self> {
        Ok(Self {
            collection: RowCollection::with_capacity(row, objectcount)?,
        })
    }

    pub fn with_config(self, config: CollectionConfig) -> Result<Self> {
        Ok(Self {
            collection: self.collection.with_config(config)?,
        })
    }

    pub fn with_sort_pool(self, pool: Arc<SortPool>) -> Self {
        Self {
            collection: self.collection.with_sort_pool(pool),
        }
    }

    pub fn with_memory(self, memory: Arc<dyn MemoryOracle>) -> Self {
        Self {
            collection: self.collection.with_memory(memory),
        }
    }

    /// Rebuilds a set from an exported collection.
    pub fn from_exported(row: Arc<Row>, exported: &[u8]) -> Result<Self> {
        Ok(Self {
            collection: RowCollection::from_exported(row, exported)?,
        })
    }

    pub fn from_collection(collection: RowCollection) -> Self {
        Self { collection }
    }

    /// An empty set sharing this one's row, config and oracle.
    pub fn empty_like(&self) -> Self {
        Self {
            collection: self.collection.empty_like(),
        }
    }

    pub fn collection(&self) -> &RowCollection {
        &self.collection
    }

    pub fn into_collection(self) -> RowCollection {
        self.collection
    }

    pub fn row(&self) -> &Arc<Row> {
        self.collection.row()
    }

    pub fn size(&self) -> usize {
        self.collection.size()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn sorted(&self) -> usize {
        self.collection.sorted()
    }

    pub fn mem(&self) -> usize {
        self.collection.mem()
    }

    pub fn memory_needed_for_grow(&self) -> u64 {
        self.collection.memory_needed_for_grow()
    }

    /// Position of `key`, or `None`.
    fn find(&mut self, key: &[u8]) -> Option<usize> {
        if key.len() != self.row().primary_key_length() {
            return None;
        }
        let tail = self.collection.size() - self.collection.sorted();
        if tail > self.collection.config().resort_limit {
            self.collection.sort();
        }
        let (position, found) = self.search_prefix(key);
        if found {
            return Some(position);
        }
        (self.collection.sorted()..self.collection.size())
            .find(|&i| self.collection.key(i) == Some(key))
    }

    /// Binary search over the ordered prefix. Returns the index of `key` or
    /// of the first greater key, and whether `key` was hit.
    fn search_prefix(&self, key: &[u8]) -> (usize, bool) {
        let mut l = 0;
        let mut r = self.collection.sorted();
        while l < r {
            let p = (l + r) / 2;
            match self.collection.compare_key(p, key) {
                Ordering::Equal => return (p, true),
                Ordering::Greater => r = p,
                Ordering::Less => l = p + 1,
            }
        }
        (l, false)
    }

    /// Index of `key`, or of the first greater key, after sorting.
    pub fn binary_position(&mut self, key: &[u8]) -> usize {
        self.collection.sort();
        self.search_prefix(key).0
    }

    pub fn has(&mut self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Entry> {
        let index = self.find(key)?;
        self.collection.get(index)
    }

    pub fn view(&mut self, key: &[u8]) -> Option<EntryView<'_>> {
        let index = self.find(key)?;
        self.collection.view(index)
    }

    pub fn get_at(&self, index: usize) -> Option<Entry> {
        self.collection.get(index)
    }

    /// Inserts or replaces in place. Returns true if the key was new.
    pub fn put(&mut self, entry: &Entry) -> Result<bool> {
        match self.find(entry.primary_key()) {
            Some(index) => {
                self.collection.set(index, entry)?;
                Ok(false)
            }
            None => {
                self.collection.add_unique(entry)?;
                Ok(true)
            }
        }
    }

    /// Inserts or replaces in place and returns the replaced entry.
    pub fn replace(&mut self, entry: &Entry) -> Result<Option<Entry>> {
        match self.find(entry.primary_key()) {
            Some(index) => {
                let old = self.collection.get(index);
                self.collection.set(index, entry)?;
                Ok(old)
            }
            None => {
                self.collection.add_unique(entry)?;
                Ok(None)
            }
        }
    }

    /// Appends without looking up the key.
    pub fn add_unique(&mut self, entry: &Entry) -> Result<()> {
        self.collection.add_unique(entry)
    }

    /// Adds `add` to column `col` of `key` and returns the new value. An
    /// absent key is inserted as `initrow` and `initrow`'s value returned;
    /// without `initrow` nothing changes and `None` is returned.
    pub fn inc(
        &mut self,
        key: &[u8],
        col: usize,
        add: i64,
        initrow: Option<&Entry>,
    ) -> Result<Option<i64>> {
        if let Some(index) = self.find(key) {
            let Some(mut entry) = self.collection.get(index) else {
                return Ok(None);
            };
            let value = entry.inc_col(col, add)?;
            self.collection.set(index, &entry)?;
            return Ok(Some(value));
        }
        match initrow {
            Some(initrow) => {
                self.collection.add_unique(initrow)?;
                Ok(Some(initrow.col_long(col)?))
            }
            None => Ok(None),
        }
    }

    /// Removes every record with `key`, keeping order, and returns the last
    /// one removed.
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let mut removed = None;
        while let Some(index) = self.find(key) {
            removed = self.collection.get(index);
            self.collection.remove_row(index, true);
        }
        removed
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        let mut found = false;
        while let Some(index) = self.find(key) {
            found = true;
            self.collection.remove_row(index, true);
        }
        found
    }

    /// Deletes several keys, highest position first, without keeping order.
    pub fn delete_all<'k>(&mut self, keys: impl IntoIterator<Item = &'k [u8]>) {
        let mut positions: Vec<usize> = keys.into_iter().filter_map(|k| self.find(k)).collect();
        positions.sort_unstable();
        positions.dedup();
        for index in positions.into_iter().rev() {
            self.collection.remove_row(index, false);
        }
    }

    pub fn remove_one(&mut self) -> Option<Entry> {
        self.collection.remove_one()
    }

    pub fn remove_doubles(&mut self) -> Result<Vec<RowCollection>> {
        self.collection.remove_doubles()
    }

    pub fn top(&self, n: usize) -> Vec<Entry> {
        self.collection.top(n)
    }

    pub fn random(&self, n: usize) -> Vec<Entry> {
        self.collection.random(n)
    }

    pub fn smallest_key(&mut self) -> Option<Vec<u8>> {
        self.collection.smallest_key()
    }

    pub fn largest_key(&mut self) -> Option<Vec<u8>> {
        self.collection.largest_key()
    }

    pub fn sort(&mut self) {
        self.collection.sort();
    }

    pub fn uniq(&mut self) {
        self.collection.uniq();
    }

    pub fn trim(&mut self) {
        self.collection.trim();
    }

    pub fn optimize(&mut self) {
        self.collection.optimize();
    }

    pub fn clear(&mut self) {
        self.collection.clear();
    }

    pub fn export_collection(&mut self) -> bytes::Bytes {
        self.collection.export_collection()
    }

    /// Records in key order, starting at `first`.
    ///
    /// Ascending iteration starts at the smallest key not below `first`.
    /// Descending iteration starts at the largest key not above `first`, or
    /// at the largest key when `first` is `None`.
    pub fn rows(&mut self, up: bool, first: Option<&[u8]>) -> Rows<'_> {
        self.collection.sort();
        let count = self.collection.size();
        let (front, back) = match (up, first) {
            (true, None) => (0, count),
            (true, Some(first)) => (self.search_prefix(first).0, count),
            (false, None) => (0, count),
            (false, Some(first)) => {
                let (position, found) = self.search_prefix(first);
                (0, if found { position + 1 } else { position })
            }
        };
        Rows {
            collection: &self.collection,
            front,
            back,
            up,
        }
    }

    /// Keys in key order; see `rows` for where iteration starts.
    pub fn keys(&mut self, up: bool, first: Option<&[u8]>) -> impl Iterator<Item = &[u8]> + '_ {
        self.rows(up, first).map(|view| view.key())
    }

    /// Ordered merge of two collections. Keys present in both keep the
    /// record from `c0`.
    pub fn merge_enum(c0: &mut RowCollection, c1: &mut RowCollection) -> Result<RowSet> {
        c0.sort();
        c1.sort();
        let mut merged = RowSet::from_collection(c0.empty_like());
        let order = c0.row().order();
        let (mut i, mut j) = (0, 0);
        let mut last: Option<Vec<u8>> = None;
        while i < c0.size() || j < c1.size() {
            let take_left = match (c0.key(i), c1.key(j)) {
                (Some(a), Some(b)) => match order.compare(a, b) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => {
                        j += 1;
                        true
                    }
                },
                (Some(_), None) => true,
                (None, _) => false,
            };
            let view = if take_left {
                i += 1;
                c0.view(i - 1)
            } else {
                j += 1;
                c1.view(j - 1)
            };
            let Some(view) = view else { break };
            if last.as_deref() == Some(view.key()) {
                continue;
            }
            last = Some(view.key().to_vec());
            merged.collection.add_sorted(view.raw())?;
        }
        Ok(merged)
    }

    /// Merges `other` into this set. Keys present in both keep this set's
    /// record.
    pub fn merge(mut self, mut other: RowSet) -> Result<RowSet> {
        if other.is_empty() {
            return Ok(self);
        }
        if self.is_empty() {
            return Ok(other);
        }
        RowSet::merge_enum(&mut self.collection, &mut other.collection)
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RowSet").field(&self.collection).finish()
    }
}

/// Iterator over a sorted set in either direction.
pub struct Rows<'a> {
    collection: &'a RowCollection,
    front: usize,
    back: usize,
    up: bool,
}

impl<'a> Iterator for Rows<'a> {
    type Item = EntryView<'a>;

    fn next(&mut self) -> Option<EntryView<'a>> {
        if self.front >= self.back {
            return None;
        }
        let index = if self.up {
            self.front += 1;
            self.front - 1
        } else {
            self.back -= 1;
            self.back
        };
        let collection: &'a RowCollection = self.collection;
        collection.view(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back.saturating_sub(self.front);
        (n, Some(n))
    }
}
