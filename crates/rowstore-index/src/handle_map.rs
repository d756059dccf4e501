//! Map from fixed-length keys to 64-bit handles.
//!
//! Backed by a `RamIndexCluster` whose row is the key followed by one
//! big-endian cardinal column. Counter updates run under the owning shard's
//! lock.

use crate::cluster::RamIndexCluster;
use crate::flat;
use crate::index::{Index, KeyIter};
use rowstore_common::{ByteOrder, IndexConfig, Result, StoreError};
use rowstore_row::{CellType, Cells, Column, Encoder, Entry, Row};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub struct HandleMap {
    row: Arc<Row>,
    index: RamIndexCluster,
}

impl HandleMap {
    /// An empty map. `idxbytes` is the width of the handle column, at most 8.
    pub fn new(
        name: impl Into<String>,
        keylen: usize,
        order: ByteOrder,
        idxbytes: usize,
        config: &IndexConfig,
    ) -> Result<Self> {
        let row = Arc::new(Self::handle_row(keylen, order, idxbytes)?);
        Ok(Self {
            index: RamIndexCluster::with_config(name, row.clone(), config),
            row,
        })
    }

    fn handle_row(keylen: usize, order: ByteOrder, idxbytes: usize) -> Result<Row> {
        let key = Column::new("key", CellType::Binary, Encoder::Bytes, keylen, "key");
        let handle = Column::parse(&format!("long c-{idxbytes} {{b256}}"))?;
        Row::new(vec![key, handle], order)
    }

    /// Loads a dump written by `dump`. Records with malformed keys are
    /// skipped.
    pub fn restore(
        path: impl AsRef<Path>,
        keylen: usize,
        order: ByteOrder,
        idxbytes: usize,
        config: &IndexConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let map = Self::new(path.display().to_string(), keylen, order, idxbytes, config)?;
        let mut skipped = 0usize;
        flat::read_records(path, map.row.objectsize(), |record| {
            match map.row.new_entry(record) {
                Some(entry) => map.index.add_unique(&entry)?,
                None => skipped += 1,
            }
            Ok(())
        })?;
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "malformed records skipped on restore");
        }
        map.optimize();
        info!(path = %path.display(), records = map.size(), "handle map restored");
        Ok(map)
    }

    /// Starts a background loader. Feed it with `consume` and collect the
    /// map through `finish`.
    pub fn async_initializer(
        name: impl Into<String>,
        keylen: usize,
        order: ByteOrder,
        idxbytes: usize,
        config: &IndexConfig,
    ) -> Result<HandleMapInitializer> {
        let name = name.into();
        let map = Self::new(name.clone(), keylen, order, idxbytes, config)?;
        let (sender, receiver) = mpsc::channel(config.init_channel_capacity.max(1));
        let (done, result) = oneshot::channel();
        thread::Builder::new()
            .name("handlemap-init".to_string())
            .spawn(move || {
                let loaded = Self::drain(map, receiver);
                if done.send(loaded).is_err() {
                    debug!(map = %name, "initializer result dropped");
                }
            })?;
        Ok(HandleMapInitializer { sender, result })
    }

    fn drain(map: HandleMap, mut receiver: mpsc::Receiver<(Vec<u8>, i64)>) -> Result<HandleMap> {
        let mut count = 0usize;
        while let Some((key, value)) = receiver.blocking_recv() {
            map.put_unique(&key, value)?;
            count += 1;
        }
        map.optimize();
        debug!(records = count, "initializer drained");
        Ok(map)
    }

    pub fn row(&self) -> &Arc<Row> {
        &self.row
    }

    fn entry(&self, key: &[u8], value: i64) -> Result<Entry> {
        let expected = self.row.primary_key_length();
        if key.len() != expected {
            return Err(StoreError::KeySize {
                expected,
                actual: key.len(),
            });
        }
        let mut entry = self.row.new_entry_empty();
        entry.set_col_bytes(0, key)?;
        entry.set_col_long(1, value)?;
        Ok(entry)
    }

    pub fn size(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.index.has(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<i64>> {
        self.index.get(key)?.map(|e| e.col_long(1)).transpose()
    }

    /// Sets the handle of `key` and returns the previous one.
    pub fn put(&self, key: &[u8], value: i64) -> Result<Option<i64>> {
        let entry = self.entry(key, value)?;
        self.index.replace(&entry)?.map(|e| e.col_long(1)).transpose()
    }

    /// Adds a key the caller knows is absent.
    pub fn put_unique(&self, key: &[u8], value: i64) -> Result<()> {
        let entry = self.entry(key, value)?;
        self.index.add_unique(&entry)
    }

    /// Adds `delta` to the handle of `key` and returns the new value. An
    /// absent key starts at `delta`.
    pub fn add(&self, key: &[u8], delta: i64) -> Result<i64> {
        let initrow = self.entry(key, delta)?;
        self.index
            .inc(key, 1, delta, Some(&initrow))?
            .ok_or_else(|| StoreError::Internal("counter row was not inserted".into()))
    }

    pub fn inc(&self, key: &[u8]) -> Result<i64> {
        self.add(key, 1)
    }

    pub fn dec(&self, key: &[u8]) -> Result<i64> {
        self.add(key, -1)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<i64>> {
        self.index.remove(key)?.map(|e| e.col_long(1)).transpose()
    }

    pub fn remove_one(&self) -> Result<Option<i64>> {
        self.index.remove_one()?.map(|e| e.col_long(1)).transpose()
    }

    /// Removes duplicated keys and reports the dropped handles, one list
    /// per key.
    pub fn remove_doubles(&self) -> Result<Vec<Vec<i64>>> {
        self.index
            .remove_doubles()?
            .iter()
            .map(|group| group.iter().map(|e| e.col_long(1)).collect::<Result<Vec<i64>>>())
            .collect()
    }

    /// Keys of up to `n` recently written entries.
    pub fn top(&self, n: usize) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .index
            .top(n)?
            .into_iter()
            .map(|e| e.primary_key().to_vec())
            .collect())
    }

    pub fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        self.index.keys(up, first)
    }

    /// `(key, handle)` pairs in ascending key order.
    pub fn iter(&self) -> Result<impl Iterator<Item = (Vec<u8>, i64)> + Send> {
        Ok(self
            .index
            .rows(true, None)?
            .filter_map(|e| Some((e.primary_key().to_vec(), e.col_long(1).ok()?))))
    }

    pub fn smallest_key(&self) -> Option<Vec<u8>> {
        self.index.smallest_key()
    }

    pub fn largest_key(&self) -> Option<Vec<u8>> {
        self.index.largest_key()
    }

    /// Returns the longest prefix shared by neighbouring keys and the
    /// number of handle bytes actually in use.
    pub fn saturation(&self) -> Result<(usize, usize)> {
        let width = self.row.width(1).unwrap_or(0);
        let mut shared = 0;
        let mut zeros = width;
        let mut last: Option<Vec<u8>> = None;
        for entry in self.index.rows(true, None)? {
            let key = entry.primary_key();
            if let Some(last) = &last {
                let common = last.iter().zip(key).take_while(|(a, b)| a == b).count();
                shared = shared.max(common);
            }
            let leading = entry.col_bytes(1)?.iter().take_while(|&&b| b == 0).count();
            zeros = zeros.min(leading);
            last = Some(key.to_vec());
        }
        Ok((shared, width - zeros))
    }

    pub fn mem(&self) -> usize {
        self.index.mem()
    }

    pub fn optimize(&self) {
        self.index.optimize();
    }

    pub fn clear(&self) -> Result<()> {
        self.index.clear()
    }

    pub fn close(&self) {
        self.index.close();
    }

    /// Writes all entries in key order and returns how many were written.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let rows = self.index.rows(true, None)?;
        let count = flat::write_records(path, rows.map(Entry::into_bytes))?;
        info!(path = %path.display(), records = count, "handle map dumped");
        Ok(count)
    }
}

/// Producer side of `HandleMap::async_initializer`.
pub struct HandleMapInitializer {
    sender: mpsc::Sender<(Vec<u8>, i64)>,
    result: oneshot::Receiver<Result<HandleMap>>,
}

impl HandleMapInitializer {
    /// Queues one entry, blocking while the channel is full.
    ///
    /// Must not be called from inside an async runtime.
    pub fn consume(&self, key: &[u8], value: i64) -> Result<()> {
        self.sender
            .blocking_send((key.to_vec(), value))
            .map_err(|_| StoreError::InitializerClosed)
    }

    /// Closes the channel. The loader finishes once it has drained it.
    pub fn finish(self) -> PendingHandleMap {
        drop(self.sender);
        PendingHandleMap {
            result: self.result,
        }
    }
}

/// A map still being loaded. Await it or call `wait`.
pub struct PendingHandleMap {
    result: oneshot::Receiver<Result<HandleMap>>,
}

impl PendingHandleMap {
    /// Blocks until the loader is done. Must not be called from inside an
    /// async runtime.
    pub fn wait(self) -> Result<HandleMap> {
        self.result
            .blocking_recv()
            .map_err(|_| StoreError::InitializerClosed)?
    }
}

impl Future for PendingHandleMap {
    type Output = Result<HandleMap>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().result)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(StoreError::InitializerClosed)))
    }
}
