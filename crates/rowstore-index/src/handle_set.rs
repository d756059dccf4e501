//! Ordered set of fixed-length keys, with intersection and difference.

use crate::collection::RowCollection;
use crate::flat;
use crate::rowset::RowSet;
use rowstore_common::{ByteOrder, Result, StoreError};
use rowstore_row::{CellType, Column, Encoder, Row};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// How two sets are intersected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Walk both sets in key order.
    Enumeration,
    /// Look up every key of the smaller set in the larger one.
    MembershipTest,
}

impl JoinStrategy {
    /// The cheaper strategy for sets of the given sizes.
    pub fn choose(a: usize, b: usize) -> Self {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let steps_enum = 10 * (high + low).saturating_sub(1);
        let steps_test = 12 * log2a(high) * low;
        if steps_enum > steps_test {
            JoinStrategy::MembershipTest
        } else {
            JoinStrategy::Enumeration
        }
    }
}

/// One plus the integer base-2 logarithm; zero for zero.
fn log2a(x: usize) -> usize {
    (usize::BITS - x.leading_zeros()) as usize
}

#[derive(Clone)]
pub struct HandleSet {
    set: RowSet,
}

impl HandleSet {
    pub fn new(keylen: usize, order: ByteOrder) -> Result<Self> {
        Ok(Self {
            set: RowSet::new(Arc::new(Self::key_row(keylen, order)?)),
        })
    }

    pub fn with_capacity(keylen: usize, order: ByteOrder, objectcount: usize) -> Result<Self> {
        let row = Arc::new(Self::key_row(keylen, order)?);
        Ok(Self {
            set: RowSet::with_capacity(row, objectcount)?,
        })
    }

    fn key_row(keylen: usize, order: ByteOrder) -> Result<Row> {
        let key = Column::new("key", CellType::Binary, Encoder::Bytes, keylen, "key");
        Row::new(vec![key], order)
    }

    /// Loads a dump written by `dump`, skipping malformed keys.
    pub fn restore(path: impl AsRef<Path>, keylen: usize, order: ByteOrder) -> Result<Self> {
        let path = path.as_ref();
        let mut handles = Self::new(keylen, order)?;
        let row = handles.row().clone();
        let mut skipped = 0usize;
        flat::read_records(path, keylen, |record| {
            match row.new_entry(record) {
                Some(entry) => handles.set.add_unique(&entry)?,
                None => skipped += 1,
            }
            Ok(())
        })?;
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "malformed keys skipped on restore");
        }
        handles.set.uniq();
        handles.set.trim();
        info!(path = %path.display(), keys = handles.size(), "handle set restored");
        Ok(handles)
    }

    /// Writes all keys in ascending order and returns how many were written.
    pub fn dump(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let count = flat::write_records(path, self.set.keys(true, None))?;
        info!(path = %path.display(), keys = count, "handle set dumped");
        Ok(count)
    }

    pub fn row(&self) -> &Arc<Row> {
        self.set.row()
    }

    pub fn keylen(&self) -> usize {
        self.row().primary_key_length()
    }

    pub fn size(&self) -> usize {
        self.set.size()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn mem(&self) -> usize {
        self.set.mem()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.keylen() {
            return Err(StoreError::KeySize {
                expected: self.keylen(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Adds `key`. Returns true if it was new.
    pub fn put(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        if self.set.has(key) {
            return Ok(false);
        }
        self.put_unique(key)?;
        Ok(true)
    }

    /// Adds a key the caller knows is absent.
    pub fn put_unique(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let mut entry = self.row().new_entry_empty();
        entry.set_col_bytes(0, key)?;
        self.set.add_unique(&entry)
    }

    pub fn has(&mut self, key: &[u8]) -> bool {
        self.set.has(key)
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.set.delete(key)
    }

    pub fn remove_one(&mut self) -> Option<Vec<u8>> {
        self.set.remove_one().map(|e| e.into_bytes())
    }

    pub fn keys(&mut self, up: bool, first: Option<&[u8]>) -> impl Iterator<Item = &[u8]> + '_ {
        self.set.keys(up, first)
    }

    /// Keys in ascending order.
    pub fn iter(&mut self) -> impl Iterator<Item = &[u8]> + '_ {
        self.set.keys(true, None)
    }

    pub fn smallest_key(&mut self) -> Option<Vec<u8>> {
        self.set.smallest_key()
    }

    pub fn largest_key(&mut self) -> Option<Vec<u8>> {
        self.set.largest_key()
    }

    pub fn optimize(&mut self) {
        self.set.optimize();
    }

    pub fn clear(&mut self) {
        self.set.clear();
    }

    /// Intersection of `a` and `b`, using the cheaper strategy.
    pub fn join_constructive(a: &mut HandleSet, b: &mut HandleSet) -> Result<HandleSet> {
        let strategy = JoinStrategy::choose(a.size(), b.size());
        Self::join_with(a, b, strategy)
    }

    /// Intersection of `a` and `b` using `strategy`.
    pub fn join_with(
        a: &mut HandleSet,
        b: &mut HandleSet,
        strategy: JoinStrategy,
    ) -> Result<HandleSet> {
        if a.row().order() != b.row().order() || a.keylen() != b.keylen() {
            return Err(StoreError::OrderMismatch {
                expected: a.row().order().signature().to_string(),
                actual: b.row().order().signature().to_string(),
            });
        }
        let mut joined = a.set.collection().empty_like();
        for key in Self::common_keys(a, b, strategy) {
            joined.add_sorted(&key)?;
        }
        Ok(HandleSet {
            set: RowSet::from_collection(joined),
        })
    }

    /// Removes every key of `other` from this set.
    pub fn exclude_destructive(&mut self, other: &mut HandleSet) {
        if self.is_empty() || other.is_empty() {
            return;
        }
        let strategy = JoinStrategy::choose(self.size(), other.size());
        let doomed = Self::common_keys(self, other, strategy);
        self.set.delete_all(doomed.iter().map(Vec::as_slice));
    }

    /// Keys present in both sets, ascending.
    fn common_keys(a: &mut HandleSet, b: &mut HandleSet, strategy: JoinStrategy) -> Vec<Vec<u8>> {
        if a.is_empty() || b.is_empty() {
            return Vec::new();
        }
        match strategy {
            JoinStrategy::MembershipTest => {
                let (small, large) = if a.size() <= b.size() { (a, b) } else { (b, a) };
                let keys: Vec<Vec<u8>> = small.iter().map(<[u8]>::to_vec).collect();
                keys.into_iter().filter(|k| large.has(k)).collect()
            }
            JoinStrategy::Enumeration => {
                let order = a.row().order();
                let mut common = Vec::new();
                let mut left = a.iter().peekable();
                let mut right = b.iter().peekable();
                while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
                    match order.compare(l, r) {
                        Ordering::Less => {
                            left.next();
                        }
                        Ordering::Greater => {
                            right.next();
                        }
                        Ordering::Equal => {
                            common.push(l.to_vec());
                            left.next();
                            right.next();
                        }
                    }
                }
                common
            }
        }
    }

    pub fn into_collection(self) -> RowCollection {
        self.set.into_collection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set_of(keys: impl IntoIterator<Item = u32>) -> HandleSet {
        let mut set = HandleSet::new(4, ByteOrder::NATURAL).unwrap();
        for k in keys {
            set.put(&k.to_be_bytes()).unwrap();
        }
        set
    }

    fn contents(set: &mut HandleSet) -> Vec<u32> {
        set.iter()
            .map(|k| u32::from_be_bytes([k[0], k[1], k[2], k[3]]))
            .collect()
    }

    #[test]
    fn test_put_has_remove() {
        let mut set = HandleSet::new(4, ByteOrder::NATURAL).unwrap();
        assert!(set.put(b"abcd").unwrap());
        assert!(!set.put(b"abcd").unwrap());
        assert!(set.has(b"abcd"));
        assert!(set.remove(b"abcd"));
        assert!(!set.has(b"abcd"));
        assert!(set.put(b"ab").is_err());
    }

    #[test]
    fn test_zero_key_length_rejected() {
        assert!(matches!(
            HandleSet::new(0, ByteOrder::NATURAL),
            Err(StoreError::SchemaDefinition(_))
        ));
    }

    #[test]
    fn test_iteration_order() {
        let mut set = set_of([5, 1, 4, 2, 3]);
        assert_eq!(contents(&mut set), vec![1, 2, 3, 4, 5]);
        let down: Vec<Vec<u8>> = set.keys(false, Some(&3u32.to_be_bytes())).map(<[u8]>::to_vec).collect();
        assert_eq!(down.len(), 3);
        assert_eq!(set.smallest_key(), Some(1u32.to_be_bytes().to_vec()));
        assert_eq!(set.largest_key(), Some(5u32.to_be_bytes().to_vec()));
        assert!(set.remove_one().is_some());
        assert_eq!(set.size(), 4);
    }

    #[test]
    fn test_strategy_choice() {
        assert_eq!(JoinStrategy::choose(1000, 1000), JoinStrategy::Enumeration);
        assert_eq!(JoinStrategy::choose(3, 100_000), JoinStrategy::MembershipTest);
        assert_eq!(JoinStrategy::choose(100_000, 3), JoinStrategy::MembershipTest);
        assert_eq!(log2a(0), 0);
        assert_eq!(log2a(1), 1);
        assert_eq!(log2a(8), 4);
    }

    #[test]
    fn test_join_strategies_agree() {
        let mut a = set_of((0..300).map(|i| i * 2));
        let mut b = set_of((0..300).map(|i| i * 3));
        let mut by_enum = HandleSet::join_with(&mut a, &mut b, JoinStrategy::Enumeration).unwrap();
        let mut by_test = HandleSet::join_with(&mut a, &mut b, JoinStrategy::MembershipTest).unwrap();
        let expected: Vec<u32> = (0..300).map(|i| i * 6).filter(|&v| v < 598).collect();
        assert_eq!(contents(&mut by_enum), expected);
        assert_eq!(contents(&mut by_test), expected);

        let mut auto = HandleSet::join_constructive(&mut a, &mut b).unwrap();
        assert_eq!(contents(&mut auto), expected);
    }

    #[test]
    fn test_join_with_empty() {
        let mut a = set_of([1, 2, 3]);
        let mut b = set_of(std::iter::empty());
        assert!(HandleSet::join_constructive(&mut a, &mut b).unwrap().is_empty());
    }

    #[test]
    fn test_exclude_destructive() {
        let mut a = set_of(1..=10);
        let mut b = set_of([2, 4, 6, 20]);
        a.exclude_destructive(&mut b);
        assert_eq!(contents(&mut a), vec![1, 3, 5, 7, 8, 9, 10]);
        assert_eq!(b.size(), 4);

        let mut small = set_of([1, 2]);
        let mut large = set_of(0..1000);
        small.exclude_destructive(&mut large);
        assert!(small.is_empty());
    }

    #[test]
    fn test_dump_restore() {
        let dir = tempdir().unwrap();
        for name in ["keys.set", "keys.set.gz"] {
            let path = dir.path().join(name);
            let mut set = set_of((0..50).rev());
            assert_eq!(set.dump(&path).unwrap(), 50);
            let mut restored = HandleSet::restore(&path, 4, ByteOrder::NATURAL).unwrap();
            assert_eq!(contents(&mut restored), (0..50).collect::<Vec<u32>>());
        }
    }
}
