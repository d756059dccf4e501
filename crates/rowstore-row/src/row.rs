//! Row schema: an ordered list of fixed-width columns.

use crate::column::Column;
use crate::entry::{Entry, EntryView};
use rowstore_common::{ByteOrder, Result, StoreError};
use std::fmt;
use std::sync::Arc;

/// Immutable record layout shared by every entry of a collection.
///
/// Column 0 is the primary key. Its bytes are compared with the row's
/// `ByteOrder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Vec<Column>,
    colstart: Vec<usize>,
    objectsize: usize,
    order: ByteOrder,
}

impl Row {
    pub fn new(columns: Vec<Column>, order: ByteOrder) -> Result<Row> {
        if columns.is_empty() {
            return Err(StoreError::SchemaDefinition(
                "a row needs at least one column".into(),
            ));
        }
        let mut colstart = Vec::with_capacity(columns.len());
        let mut objectsize = 0;
        for column in &columns {
            if column.width() == 0 {
                return Err(StoreError::SchemaDefinition(format!(
                    "column '{}' has zero width",
                    column.nickname()
                )));
            }
            colstart.push(objectsize);
            objectsize += column.width();
        }
        Ok(Row {
            columns,
            colstart,
            objectsize,
            order,
        })
    }

    /// Parses a comma-separated list of column definitions. Commas inside
    /// quoted descriptions do not split, and anything after a `|` outside
    /// quotes is ignored.
    pub fn parse(structure: &str, order: ByteOrder) -> Result<Row> {
        let mut definitions = Vec::new();
        let mut quoted = false;
        let mut start = 0;
        let mut end = structure.len();
        for (i, c) in structure.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ',' if !quoted => {
                    definitions.push(&structure[start..i]);
                    start = i + 1;
                }
                '|' if !quoted => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        if quoted {
            return Err(StoreError::SchemaDefinition(format!(
                "unbalanced quotes in row '{structure}'"
            )));
        }
        definitions.push(&structure[start..end]);

        let columns = definitions
            .into_iter()
            .filter(|d| !d.trim().is_empty())
            .map(Column::parse)
            .collect::<Result<Vec<_>>>()?;
        Row::new(columns, order)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col: usize) -> Option<&Column> {
        self.columns.get(col)
    }

    /// Finds a column by nickname.
    pub fn column_by_name(&self, nickname: &str) -> Option<(usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.nickname() == nickname)
    }

    pub fn width(&self, col: usize) -> Option<usize> {
        self.columns.get(col).map(Column::width)
    }

    pub fn colstart(&self, col: usize) -> Option<usize> {
        self.colstart.get(col).copied()
    }

    /// Byte range of a cell, or an error for columns past the row.
    pub fn cell_range(&self, col: usize) -> Result<std::ops::Range<usize>> {
        match (self.colstart.get(col), self.columns.get(col)) {
            (Some(&start), Some(column)) => Ok(start..start + column.width()),
            _ => Err(StoreError::ColumnOutOfRange {
                column: col,
                columns: self.columns.len(),
            }),
        }
    }

    /// Total bytes of one record.
    pub fn objectsize(&self) -> usize {
        self.objectsize
    }

    pub fn primary_key_length(&self) -> usize {
        self.columns[0].width()
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Returns true if `other`'s columns are a prefix of this row's columns.
    pub fn subsumes(&self, other: &Row) -> bool {
        other.columns.len() <= self.columns.len()
            && other
                .columns
                .iter()
                .zip(&self.columns)
                .all(|(a, b)| a.width() == b.width() && a.cell_type() == b.cell_type())
    }

    /// Wraps a copy of `bytes` as an entry. Returns `None` if `bytes` is
    /// shorter than a record or its key is not well-formed for the order.
    /// Extra trailing bytes are ignored.
    pub fn new_entry(self: &Arc<Self>, bytes: &[u8]) -> Option<Entry> {
        if bytes.len() < self.objectsize {
            return None;
        }
        let bytes = &bytes[..self.objectsize];
        if !self.order.wellformed(&bytes[..self.primary_key_length()]) {
            return None;
        }
        Some(Entry::from_parts(Arc::clone(self), bytes.to_vec()))
    }

    /// A zero-filled entry.
    pub fn new_entry_empty(self: &Arc<Self>) -> Entry {
        Entry::from_parts(Arc::clone(self), vec![0u8; self.objectsize])
    }

    /// Builds an entry cell by cell. Short cells are zero padded and long
    /// cells are truncated; missing trailing cells stay zero.
    pub fn new_entry_from_cells(self: &Arc<Self>, cells: &[&[u8]]) -> Result<Entry> {
        if cells.len() > self.columns.len() {
            return Err(StoreError::ColumnOutOfRange {
                column: cells.len() - 1,
                columns: self.columns.len(),
            });
        }
        let mut entry = self.new_entry_empty();
        for (col, cell) in cells.iter().enumerate() {
            entry.set_col_bytes(col, cell)?;
        }
        Ok(entry)
    }

    /// Borrows `bytes` as a record of this row without copying.
    pub fn view<'a>(self: &'a Arc<Self>, bytes: &'a [u8]) -> Option<EntryView<'a>> {
        if bytes.len() < self.objectsize {
            return None;
        }
        Some(EntryView::new(self, &bytes[..self.objectsize]))
    }

    /// A one-column row holding only this row's primary key.
    pub fn key_row(&self) -> Row {
        Row {
            columns: vec![self.columns[0].clone()],
            colstart: vec![0],
            objectsize: self.primary_key_length(),
            order: self.order,
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CellType, Encoder};
    use crate::entry::Cells;

    fn url_row() -> Arc<Row> {
        Arc::new(
            Row::parse(
                r#"byte[] hash-12, String title-16 "title, short", long c-4 {b256}, Cardinal s-3 {b64e}"#,
                ByteOrder::BASE64,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_parse_layout() {
        let row = url_row();
        assert_eq!(row.column_count(), 4);
        assert_eq!(row.objectsize(), 12 + 16 + 4 + 3);
        assert_eq!(row.primary_key_length(), 12);
        assert_eq!(row.colstart(0), Some(0));
        assert_eq!(row.colstart(1), Some(12));
        assert_eq!(row.colstart(2), Some(28));
        assert_eq!(row.colstart(3), Some(32));
        assert_eq!(row.colstart(4), None);
        assert_eq!(row.column(1).unwrap().description(), "title, short");
        assert_eq!(row.order(), ByteOrder::BASE64);
    }

    #[test]
    fn test_parse_ignores_property_part() {
        let row = Row::parse("byte[] k-4, long v-2 {b256} | extra", ByteOrder::NATURAL).unwrap();
        assert_eq!(row.column_count(), 2);
        assert_eq!(row.objectsize(), 6);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Row::parse("", ByteOrder::NATURAL).is_err());
        assert!(Row::parse("byte[] k-4, \"open", ByteOrder::NATURAL).is_err());
        assert!(Row::parse("byte[] k-4, float f-4", ByteOrder::NATURAL).is_err());
    }

    #[test]
    fn test_zero_width_column_rejected() {
        let columns = vec![
            Column::new("key", CellType::Binary, Encoder::Bytes, 4, "key"),
            Column::new("empty", CellType::Binary, Encoder::Bytes, 0, ""),
        ];
        assert!(matches!(
            Row::new(columns, ByteOrder::NATURAL),
            Err(StoreError::SchemaDefinition(_))
        ));
        let key_only = vec![Column::new("key", CellType::Binary, Encoder::Bytes, 0, "")];
        assert!(Row::new(key_only, ByteOrder::NATURAL).is_err());
    }

    #[test]
    fn test_column_by_name() {
        let row = url_row();
        let (idx, col) = row.column_by_name("c").unwrap();
        assert_eq!(idx, 2);
        assert_eq!(col.encoder(), Encoder::B256);
        assert!(row.column_by_name("missing").is_none());
    }

    #[test]
    fn test_cell_range() {
        let row = url_row();
        assert_eq!(row.cell_range(2).unwrap(), 28..32);
        assert!(matches!(
            row.cell_range(9),
            Err(StoreError::ColumnOutOfRange {
                column: 9,
                columns: 4
            })
        ));
    }

    #[test]
    fn test_new_entry_validates_key() {
        let row = url_row();
        let mut bytes = vec![0u8; row.objectsize()];
        bytes[..12].copy_from_slice(b"AAAAAAAAAAAA");
        assert!(row.new_entry(&bytes).is_some());

        bytes[0] = b'!';
        assert!(row.new_entry(&bytes).is_none());

        assert!(row.new_entry(&bytes[..10]).is_none());
    }

    #[test]
    fn test_new_entry_ignores_trailing_bytes() {
        let row = Arc::new(Row::parse("byte[] k-2", ByteOrder::NATURAL).unwrap());
        let entry = row.new_entry(b"abcdef").unwrap();
        assert_eq!(entry.bytes(), b"ab");
    }

    #[test]
    fn test_new_entry_from_cells() {
        let row = url_row();
        let cells: [&[u8]; 2] = [b"AAAAAAAAAAAB", b"hello"];
        let entry = row.new_entry_from_cells(&cells).unwrap();
        assert_eq!(entry.primary_key(), b"AAAAAAAAAAAB");
        assert_eq!(entry.col_string(1).unwrap().as_deref(), Some("hello"));
        assert_eq!(entry.col_long(2).unwrap(), 0);

        let too_many: [&[u8]; 5] = [b"k", b"t", b"", b"", b""];
        assert!(row.new_entry_from_cells(&too_many).is_err());
    }

    #[test]
    fn test_subsumes_and_key_row() {
        let row = url_row();
        let keys = row.key_row();
        assert_eq!(keys.column_count(), 1);
        assert_eq!(keys.objectsize(), 12);
        assert_eq!(keys.column(0).unwrap().cell_type(), CellType::Binary);
        assert!(row.subsumes(&keys));
        assert!(!keys.subsumes(&row));
    }

    #[test]
    fn test_display() {
        let row = Row::parse("byte[] k-4, long v-2 {b256}", ByteOrder::NATURAL).unwrap();
        assert_eq!(
            row.to_string(),
            r#"byte[] k-4 {bytes} "k", Cardinal v-2 {b256} "v""#
        );
        let reparsed = Row::parse(&row.to_string(), ByteOrder::NATURAL).unwrap();
        assert_eq!(reparsed, row);
    }
}
