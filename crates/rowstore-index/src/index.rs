//! The keyed index contract shared by in-memory indexes, caches and write
//! buffers.

use crate::collection::RowCollection;
use rowstore_common::Result;
use rowstore_row::{Entry, Row};
use std::sync::Arc;

/// Snapshot iterator over primary keys.
pub type KeyIter = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// Snapshot iterator over records.
pub type RowIter = Box<dyn Iterator<Item = Entry> + Send>;

/// Keyed record storage.
///
/// All methods take `&self`; implementations synchronize internally.
/// `keys` and `rows` iterate a snapshot taken when they are called.
pub trait Index: Send + Sync {
    /// Backing file, if the index has one.
    fn filename(&self) -> Option<String> {
        None
    }

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn row(&self) -> &Arc<Row>;

    fn has(&self, key: &[u8]) -> bool;

    fn get(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Inserts or replaces. Returns true if the key was new.
    fn put(&self, entry: &Entry) -> Result<bool>;

    /// Inserts a record whose key the caller guarantees is absent.
    fn add_unique(&self, entry: &Entry) -> Result<()>;

    /// Inserts or replaces and returns the replaced record.
    fn replace(&self, entry: &Entry) -> Result<Option<Entry>>;

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>>;

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Removes some record, if any.
    fn remove_one(&self) -> Result<Option<Entry>>;

    /// Removes duplicated keys, keeping one record per key, and reports the
    /// removed extras grouped by key.
    fn remove_doubles(&self) -> Result<Vec<RowCollection>>;

    /// Up to `n` most recently written records.
    fn top(&self, n: usize) -> Result<Vec<Entry>>;

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter>;

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter>;

    fn smallest_key(&self) -> Option<Vec<u8>>;

    fn largest_key(&self) -> Option<Vec<u8>>;

    /// Bytes held in memory.
    fn mem(&self) -> usize;

    fn optimize(&self) {}

    fn clear(&self) -> Result<()>;

    fn close(&self);

    fn delete_on_exit(&self) {}
}

impl<I: Index + ?Sized> Index for Arc<I> {
    fn filename(&self) -> Option<String> {
        (**self).filename()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn row(&self) -> &Arc<Row> {
        (**self).row()
    }

    fn has(&self, key: &[u8]) -> bool {
        (**self).has(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        (**self).get(key)
    }

    fn put(&self, entry: &Entry) -> Result<bool> {
        (**self).put(entry)
    }

    fn add_unique(&self, entry: &Entry) -> Result<()> {
        (**self).add_unique(entry)
    }

    fn replace(&self, entry: &Entry) -> Result<Option<Entry>> {
        (**self).replace(entry)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>> {
        (**self).remove(key)
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        (**self).delete(key)
    }

    fn remove_one(&self) -> Result<Option<Entry>> {
        (**self).remove_one()
    }

    fn remove_doubles(&self) -> Result<Vec<RowCollection>> {
        (**self).remove_doubles()
    }

    fn top(&self, n: usize) -> Result<Vec<Entry>> {
        (**self).top(n)
    }

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        (**self).keys(up, first)
    }

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter> {
        (**self).rows(up, first)
    }

    fn smallest_key(&self) -> Option<Vec<u8>> {
        (**self).smallest_key()
    }

    fn largest_key(&self) -> Option<Vec<u8>> {
        (**self).largest_key()
    }

    fn mem(&self) -> usize {
        (**self).mem()
    }

    fn optimize(&self) {
        (**self).optimize()
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn close(&self) {
        (**self).close()
    }

    fn delete_on_exit(&self) {
        (**self).delete_on_exit()
    }
}
