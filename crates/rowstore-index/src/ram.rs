//! Two-generation in-memory index.
//!
//! Generation 0 takes the bulk load through `add_unique` without any
//! ordering work. The first keyed query ends the load phase: generation 0 is
//! sorted, deduplicated and trimmed once, and generation 1 is opened for all
//! later inserts.

use crate::collection::RowCollection;
use crate::index::{Index, KeyIter, RowIter};
use crate::merge::MergeIter;
use crate::rowset::RowSet;
use parking_lot::Mutex;
use rowstore_common::{ByteOrder, Result};
use rowstore_row::{Cells, Entry, Row};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

struct Generations {
    index0: RowSet,
    /// `None` while still loading.
    index1: Option<RowSet>,
}

impl Generations {
    /// Ends the load phase if needed and returns both generations.
    fn ready(&mut self, name: &str) -> (&mut RowSet, &mut RowSet) {
        let Generations { index0, index1 } = self;
        if index1.is_none() {
            index0.sort();
            index0.uniq();
            index0.trim();
            debug!(index = name, records = index0.size(), "initial load finished");
        }
        let index1 = index1.get_or_insert_with(|| index0.empty_like());
        (index0, index1)
    }
}

pub struct RamIndex {
    name: String,
    row: Arc<Row>,
    inner: Mutex<Generations>,
}

impl RamIndex {
    pub fn new(name: impl Into<String>, row: Arc<Row>) -> Self {
        Self::from_set(name, RowSet::new(row))
    }

    pub fn with_capacity(name: impl Into<String>, row: Arc<Row>, initial: usize) -> Result<Self> {
        Ok(Self::from_set(name, RowSet::with_capacity(row, initial)?))
    }

    /// Uses `set` as generation 0. Records already in it count as loaded.
    pub fn from_set(name: impl Into<String>, set: RowSet) -> Self {
        Self {
            name: name.into(),
            row: set.row().clone(),
            inner: Mutex::new(Generations {
                index0: set,
                index1: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the first keyed query.
    pub fn is_loading(&self) -> bool {
        self.inner.lock().index1.is_none()
    }

    /// Ends the load phase explicitly.
    pub fn finish_initialization(&self) {
        self.inner.lock().ready(&self.name);
    }

    /// Adds `add` to column `col` of `key`. An absent key is inserted as
    /// `initrow`; see `RowSet::inc`.
    pub fn inc(
        &self,
        key: &[u8],
        col: usize,
        add: i64,
        initrow: Option<&Entry>,
    ) -> Result<Option<i64>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        if let Some(value) = index0.inc(key, col, add, None)? {
            return Ok(Some(value));
        }
        index1.inc(key, col, add, initrow)
    }

    /// Up to `n` records sampled across both generations.
    pub fn random(&self, n: usize) -> Vec<Entry> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        let mut sample = index1.random(n);
        if sample.len() < n {
            sample.extend(index0.random(n - sample.len()));
        }
        sample
    }

    fn pick_key(
        order: ByteOrder,
        a: Option<Vec<u8>>,
        b: Option<Vec<u8>>,
        want: Ordering,
    ) -> Option<Vec<u8>> {
        match (a, b) {
            (Some(a), Some(b)) => {
                if order.compare(&b, &a) == want {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (a, b) => a.or(b),
        }
    }
}

impl Index for RamIndex {
    fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.index0.size() + inner.index1.as_ref().map_or(0, RowSet::size)
    }

    fn row(&self) -> &Arc<Row> {
        &self.row
    }

    fn has(&self, key: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        index0.has(key) || index1.has(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        Ok(index0.get(key).or_else(|| index1.get(key)))
    }

    fn put(&self, entry: &Entry) -> Result<bool> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        if index0.has(entry.primary_key()) {
            index0.put(entry)?;
            return Ok(false);
        }
        index1.put(entry)
    }

    fn add_unique(&self, entry: &Entry) -> Result<()> {
        let mut guard = self.inner.lock();
        let Generations { index0, index1 } = &mut *guard;
        match index1 {
            Some(index1) => index1.add_unique(entry),
            None => index0.add_unique(entry),
        }
    }

    fn replace(&self, entry: &Entry) -> Result<Option<Entry>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        if index0.has(entry.primary_key()) {
            return index0.replace(entry);
        }
        index1.replace(entry)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        Ok(index0.remove(key).or_else(|| index1.remove(key)))
    }

    fn remove_one(&self) -> Result<Option<Entry>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        if !index1.is_empty() {
            return Ok(index1.remove_one());
        }
        Ok(index0.remove_one())
    }

    /// Unlike other keyed operations this ends the load phase without the
    /// deduplication pass, so doubles from the bulk load are reported.
    fn remove_doubles(&self) -> Result<Vec<RowCollection>> {
        let mut inner = self.inner.lock();
        let Generations { index0, index1 } = &mut *inner;
        let index1 = index1.get_or_insert_with(|| index0.empty_like());
        let mut doubles = index0.remove_doubles()?;
        doubles.extend(index1.remove_doubles()?);
        Ok(doubles)
    }

    fn top(&self, n: usize) -> Result<Vec<Entry>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        let mut top = index1.top(n);
        if top.len() < n {
            top.extend(index0.top(n - top.len()));
        }
        Ok(top)
    }

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        let left: Vec<Vec<u8>> = index0.keys(up, first).map(<[u8]>::to_vec).collect();
        let right: Vec<Vec<u8>> = index1.keys(up, first).map(<[u8]>::to_vec).collect();
        Ok(Box::new(MergeIter::new(
            left.into_iter(),
            right.into_iter(),
            self.row.order(),
            up,
        )))
    }

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        let left: Vec<Entry> = index0.rows(up, first).map(|v| v.to_entry()).collect();
        let right: Vec<Entry> = index1.rows(up, first).map(|v| v.to_entry()).collect();
        Ok(Box::new(MergeIter::new(
            left.into_iter(),
            right.into_iter(),
            self.row.order(),
            up,
        )))
    }

    fn smallest_key(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        Self::pick_key(
            self.row.order(),
            index0.smallest_key(),
            index1.smallest_key(),
            Ordering::Less,
        )
    }

    fn largest_key(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let (index0, index1) = inner.ready(&self.name);
        Self::pick_key(
            self.row.order(),
            index0.largest_key(),
            index1.largest_key(),
            Ordering::Greater,
        )
    }

    fn mem(&self) -> usize {
        let inner = self.inner.lock();
        inner.index0.mem() + inner.index1.as_ref().map_or(0, RowSet::mem)
    }

    /// Sorts and trims both generations. A loading index stays loading, so
    /// duplicates from the load are still there for `remove_doubles`.
    fn optimize(&self) {
        let mut inner = self.inner.lock();
        let Generations { index0, index1 } = &mut *inner;
        index0.optimize();
        if let Some(index1) = index1 {
            index1.optimize();
        }
    }

    /// Empties both generations and reopens the load phase.
    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.index0 = inner.index0.empty_like();
        inner.index1 = None;
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.index0 = inner.index0.empty_like();
        inner.index1 = None;
        debug!(index = %self.name, "index closed");
    }
}
