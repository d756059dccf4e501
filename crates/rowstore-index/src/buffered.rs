//! Write buffer in front of any `Index`.
//!
//! New keys collect in an in-memory `RowSet` and move to the backend in one
//! batch once the buffer reaches its flush threshold. Keys the backend
//! already holds are written through, so a key never lives in both places.
//!
//! Performance characteristics:
//! - Insert of a new key: amortized buffer append
//! - Lookup: buffer probe, then backend
//! - Scans: merge of the sorted buffer with the backend, buffer wins

use crate::collection::RowCollection;
use crate::index::{Index, KeyIter, RowIter};
use crate::merge::MergeIter;
use crate::rowset::RowSet;
use parking_lot::Mutex;
use rowstore_common::{IndexConfig, Result};
use rowstore_row::{Cells, Entry, Row};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Flush counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Number of flushes that moved at least one record.
    pub flush_count: u64,
    /// Records moved to the backend.
    pub flushed_records: u64,
    /// Total time spent flushing (nanoseconds).
    pub flush_time_ns: u64,
}

struct BufferState {
    buffer: RowSet,
    stats: BufferStats,
}

pub struct BufferedObjectIndex<I: Index> {
    backend: I,
    flush_threshold: usize,
    state: Mutex<BufferState>,
}

impl<I: Index> BufferedObjectIndex<I> {
    pub fn new(backend: I, flush_threshold: usize) -> Self {
        let buffer = RowSet::new(backend.row().clone());
        Self {
            backend,
            flush_threshold: flush_threshold.max(1),
            state: Mutex::new(BufferState {
                buffer,
                stats: BufferStats::default(),
            }),
        }
    }

    pub fn with_config(backend: I, config: &IndexConfig) -> Self {
        Self::new(backend, config.buffer_flush_threshold)
    }

    pub fn backend(&self) -> &I {
        &self.backend
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Records waiting in the buffer.
    pub fn buffer_len(&self) -> usize {
        self.state.lock().buffer.size()
    }

    pub fn stats(&self) -> BufferStats {
        self.state.lock().stats
    }

    /// Moves every buffered record to the backend.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BufferState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let records: Vec<Entry> = state.buffer.rows(true, None).map(|v| v.to_entry()).collect();
        for entry in &records {
            self.backend.put(entry)?;
        }
        state.buffer.clear();
        state.stats.flush_count += 1;
        state.stats.flushed_records += records.len() as u64;
        state.stats.flush_time_ns += start.elapsed().as_nanos() as u64;
        debug!(records = records.len(), "write buffer flushed");
        Ok(())
    }

    /// Makes room for one more buffered record.
    fn reserve(&self, state: &mut BufferState) -> Result<()> {
        if state.buffer.size() >= self.flush_threshold {
            self.flush_locked(state)?;
        }
        Ok(())
    }
}

impl<I: Index> Index for BufferedObjectIndex<I> {
    fn filename(&self) -> Option<String> {
        self.backend.filename()
    }

    fn size(&self) -> usize {
        let state = self.state.lock();
        state.buffer.size() + self.backend.size()
    }

    fn row(&self) -> &Arc<Row> {
        self.backend.row()
    }

    fn has(&self, key: &[u8]) -> bool {
        let mut state = self.state.lock();
        state.buffer.has(key) || self.backend.has(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.buffer.get(key) {
            return Ok(Some(entry));
        }
        self.backend.get(key)
    }

    fn put(&self, entry: &Entry) -> Result<bool> {
        let mut state = self.state.lock();
        let key = entry.primary_key();
        if state.buffer.has(key) {
            state.buffer.put(entry)?;
            return Ok(false);
        }
        if self.backend.has(key) {
            return self.backend.put(entry);
        }
        self.reserve(&mut state)?;
        state.buffer.add_unique(entry)?;
        Ok(true)
    }

    fn add_unique(&self, entry: &Entry) -> Result<()> {
        let mut state = self.state.lock();
        self.reserve(&mut state)?;
        state.buffer.add_unique(entry)
    }

    fn replace(&self, entry: &Entry) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        let key = entry.primary_key();
        if state.buffer.has(key) {
            return state.buffer.replace(entry);
        }
        if self.backend.has(key) {
            return self.backend.replace(entry);
        }
        self.reserve(&mut state)?;
        state.buffer.add_unique(entry)?;
        Ok(None)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.buffer.remove(key) {
            return Ok(Some(entry));
        }
        self.backend.remove(key)
    }

    fn remove_one(&self) -> Result<Option<Entry>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.buffer.remove_one() {
            return Ok(Some(entry));
        }
        self.backend.remove_one()
    }

    fn remove_doubles(&self) -> Result<Vec<RowCollection>> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        self.backend.remove_doubles()
    }

    fn top(&self, n: usize) -> Result<Vec<Entry>> {
        let state = self.state.lock();
        let mut top = state.buffer.top(n);
        if top.len() < n {
            top.extend(self.backend.top(n - top.len())?);
        }
        Ok(top)
    }

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        let mut state = self.state.lock();
        let buffered: Vec<Vec<u8>> = state.buffer.keys(up, first).map(<[u8]>::to_vec).collect();
        let stored = self.backend.keys(up, first)?;
        Ok(Box::new(MergeIter::new(
            buffered.into_iter(),
            stored,
            self.row().order(),
            up,
        )))
    }

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter> {
        let mut state = self.state.lock();
        let buffered: Vec<Entry> = state.buffer.rows(up, first).map(|v| v.to_entry()).collect();
        let stored = self.backend.rows(up, first)?;
        Ok(Box::new(MergeIter::new(
            buffered.into_iter(),
            stored,
            self.row().order(),
            up,
        )))
    }

    fn smallest_key(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let order = self.row().order();
        match (state.buffer.smallest_key(), self.backend.smallest_key()) {
            (Some(a), Some(b)) => Some(if order.compare(&a, &b).is_le() { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn largest_key(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let order = self.row().order();
        match (state.buffer.largest_key(), self.backend.largest_key()) {
            (Some(a), Some(b)) => Some(if order.compare(&a, &b).is_ge() { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn mem(&self) -> usize {
        let state = self.state.lock();
        state.buffer.mem() + self.backend.mem()
    }

    fn optimize(&self) {
        let mut state = self.state.lock();
        if let Err(e) = self.flush_locked(&mut state) {
            warn!(error = %e, "flush before optimize failed");
        }
        self.backend.optimize();
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.buffer.clear();
        self.backend.clear()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if let Err(e) = self.flush_locked(&mut state) {
            warn!(error = %e, records = state.buffer.size(), "write buffer lost on close");
        }
        state.buffer.clear();
        self.backend.close();
    }

    fn delete_on_exit(&self) {
        self.backend.delete_on_exit();
    }
}
