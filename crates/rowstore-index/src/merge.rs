//! Ordered merging of key-sorted streams.

use rowstore_common::ByteOrder;
use rowstore_row::{Cells, Entry};
use std::cmp::Ordering;
use std::iter::Peekable;

/// Items that carry a primary key.
pub trait MergeKey {
    fn merge_key(&self) -> &[u8];
}

impl MergeKey for Vec<u8> {
    fn merge_key(&self) -> &[u8] {
        self
    }
}

impl MergeKey for Entry {
    fn merge_key(&self) -> &[u8] {
        self.primary_key()
    }
}

/// Lazy merge of two key-ordered streams. On equal keys the left item is
/// yielded and the right one dropped.
pub struct MergeIter<L: Iterator, R: Iterator> {
    left: Peekable<L>,
    right: Peekable<R>,
    order: ByteOrder,
}

impl<T, L, R> MergeIter<L, R>
where
    T: MergeKey,
    L: Iterator<Item = T>,
    R: Iterator<Item = T>,
{
    /// `up` must match the direction both inputs are sorted in.
    pub fn new(left: L, right: R, order: ByteOrder, up: bool) -> Self {
        Self {
            left: left.peekable(),
            right: right.peekable(),
            order: if up { order } else { order.reversed() },
        }
    }
}

impl<T, L, R> Iterator for MergeIter<L, R>
where
    T: MergeKey,
    L: Iterator<Item = T>,
    R: Iterator<Item = T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let ord = match (self.left.peek(), self.right.peek()) {
            (Some(a), Some(b)) => self.order.compare(a.merge_key(), b.merge_key()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => return None,
        };
        match ord {
            Ordering::Less => self.left.next(),
            Ordering::Greater => self.right.next(),
            Ordering::Equal => {
                self.right.next();
                self.left.next()
            }
        }
    }
}

/// Merges any number of key-ordered streams. Earlier streams win ties.
pub fn merge_all<T>(
    streams: Vec<Box<dyn Iterator<Item = T> + Send>>,
    order: ByteOrder,
    up: bool,
) -> Box<dyn Iterator<Item = T> + Send>
where
    T: MergeKey + Send + 'static,
{
    streams
        .into_iter()
        .reduce(|merged, next| -> Box<dyn Iterator<Item = T> + Send> {
            Box::new(MergeIter::new(merged, next, order, up))
        })
        .unwrap_or_else(|| Box::new(std::iter::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowstore_row::Row;
    use std::sync::Arc;

    fn keys(list: &[&[u8]]) -> Vec<Vec<u8>> {
        list.iter().map(|k| k.to_vec()).collect()
    }

    #[test]
    fn test_merge_iter_interleaves() {
        let left = keys(&[b"a", b"c", b"e"]);
        let right = keys(&[b"b", b"d"]);
        let merged: Vec<Vec<u8>> =
            MergeIter::new(left.into_iter(), right.into_iter(), ByteOrder::NATURAL, true).collect();
        assert_eq!(merged, keys(&[b"a", b"b", b"c", b"d", b"e"]));
    }

    #[test]
    fn test_merge_iter_left_wins_ties() {
        let row = Arc::new(Row::parse("byte[] k-1, long v-1 {b256}", ByteOrder::NATURAL).unwrap());
        let make = |k: u8, v: i64| {
            let mut e = row.new_entry_empty();
            e.set_col_bytes(0, &[k]).unwrap();
            e.set_col_long(1, v).unwrap();
            e
        };
        let left = vec![make(b'a', 1), make(b'b', 1)];
        let right = vec![make(b'b', 2), make(b'c', 2)];
        let merged: Vec<Entry> =
            MergeIter::new(left.into_iter(), right.into_iter(), ByteOrder::NATURAL, true).collect();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].col_long(1).unwrap(), 1);
    }

    #[test]
    fn test_merge_iter_descending() {
        let left = keys(&[b"e", b"c"]);
        let right = keys(&[b"d", b"a"]);
        let merged: Vec<Vec<u8>> =
            MergeIter::new(left.into_iter(), right.into_iter(), ByteOrder::NATURAL, false).collect();
        assert_eq!(merged, keys(&[b"e", b"d", b"c", b"a"]));
    }

    #[test]
    fn test_merge_all() {
        let streams: Vec<Box<dyn Iterator<Item = Vec<u8>> + Send>> = vec![
            Box::new(keys(&[b"a", b"d"]).into_iter()),
            Box::new(keys(&[b"b", b"e"]).into_iter()),
            Box::new(keys(&[b"c", b"d"]).into_iter()),
        ];
        let merged: Vec<Vec<u8>> = merge_all(streams, ByteOrder::NATURAL, true).collect();
        assert_eq!(merged, keys(&[b"a", b"b", b"c", b"d", b"e"]));

        let empty: Vec<Vec<u8>> = merge_all(Vec::new(), ByteOrder::NATURAL, true).collect();
        assert!(empty.is_empty());
    }
}
