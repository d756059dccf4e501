//! Records of a row: owned entries and borrowed views.

use crate::column::{CellType, Encoder};
use crate::row::Row;
use rowstore_common::order::{decode_b256, decode_b64e, encode_b256, encode_b64e};
use rowstore_common::{Result, StoreError};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Read access to the cells of a record.
///
/// All accessors are offset arithmetic over the record bytes.
pub trait Cells {
    fn row(&self) -> &Row;

    fn bytes(&self) -> &[u8];

    fn primary_key(&self) -> &[u8] {
        &self.bytes()[..self.row().primary_key_length()]
    }

    fn col_bytes(&self, col: usize) -> Result<&[u8]> {
        let range = self.row().cell_range(col)?;
        Ok(&self.bytes()[range])
    }

    /// Decodes a numeric cell using its column encoder.
    fn col_long(&self, col: usize) -> Result<i64> {
        let cell = self.col_bytes(col)?;
        match self.row().columns()[col].encoder() {
            Encoder::B256 => Ok(decode_b256(cell)),
            Encoder::B64e => Ok(decode_b64e(cell)),
            Encoder::Bytes => Err(not_numeric(col)),
        }
    }

    /// The cell as text with trailing zero padding removed, or `None` if
    /// nothing is stored.
    fn col_string(&self, col: usize) -> Result<Option<String>> {
        let cell = self.col_bytes(col)?;
        let len = cell.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&cell[..len]).into_owned()))
    }

    fn col_bool(&self, col: usize) -> Result<bool> {
        Ok(self.col_bytes(col)?[0] != 0)
    }

    fn col_bit(&self, col: usize, bit: usize) -> Result<bool> {
        let cell = self.col_bytes(col)?;
        let byte = cell.get(bit / 8).ok_or_else(|| bit_out_of_range(col, bit))?;
        Ok(byte & (1 << (bit % 8)) != 0)
    }

    /// True if the cell's first byte is zero.
    fn is_empty_col(&self, col: usize) -> Result<bool> {
        Ok(self.col_bytes(col)?[0] == 0)
    }

    /// Renders the record as `{nick=value,...}`.
    fn to_property_form(&self) -> String {
        let row = self.row();
        let mut out = String::from("{");
        for (i, column) in row.columns().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(column.nickname());
            out.push('=');
            let value = match column.cell_type() {
                CellType::Cardinal => self.col_long(i).map(|v| v.to_string()),
                CellType::Boolean => self.col_bool(i).map(|v| v.to_string()),
                _ => self.col_string(i).map(Option::unwrap_or_default),
            };
            out.push_str(&value.unwrap_or_default());
        }
        out.push('}');
        out
    }
}

fn not_numeric(col: usize) -> StoreError {
    StoreError::ColumnEncoding {
        column: col,
        reason: "column has no numeric encoder".into(),
    }
}

fn bit_out_of_range(col: usize, bit: usize) -> StoreError {
    StoreError::ColumnEncoding {
        column: col,
        reason: format!("bit {bit} outside the cell"),
    }
}

/// One record with its own copy of the bytes.
///
/// Equality and hashing consider only the primary key.
#[derive(Clone)]
pub struct Entry {
    row: Arc<Row>,
    bytes: Vec<u8>,
}

impl Entry {
    pub(crate) fn from_parts(row: Arc<Row>, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), row.objectsize());
        Self { row, bytes }
    }

    pub fn shared_row(&self) -> &Arc<Row> {
        &self.row
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_view(&self) -> EntryView<'_> {
        EntryView::new(&self.row, &self.bytes)
    }

    /// Writes a cell. Shorter values are zero padded, longer ones truncated.
    pub fn set_col_bytes(&mut self, col: usize, value: &[u8]) -> Result<()> {
        let range = self.row.cell_range(col)?;
        let cell = &mut self.bytes[range];
        let n = value.len().min(cell.len());
        cell[..n].copy_from_slice(&value[..n]);
        cell[n..].fill(0);
        Ok(())
    }

    pub fn set_col_str(&mut self, col: usize, value: &str) -> Result<()> {
        self.set_col_bytes(col, value.as_bytes())
    }

    pub fn set_col_long(&mut self, col: usize, value: i64) -> Result<()> {
        let range = self.row.cell_range(col)?;
        let encoder = self.row.columns()[col].encoder();
        let cell = &mut self.bytes[range];
        match encoder {
            Encoder::B256 => encode_b256(value, cell),
            Encoder::B64e => encode_b64e(value, cell),
            Encoder::Bytes => return Err(not_numeric(col)),
        }
        Ok(())
    }

    /// Adds `add` to a numeric cell and returns the new value.
    pub fn inc_col(&mut self, col: usize, add: i64) -> Result<i64> {
        let value = self.col_long(col)?.wrapping_add(add);
        self.set_col_long(col, value)?;
        Ok(value)
    }

    pub fn set_col_bool(&mut self, col: usize, value: bool) -> Result<()> {
        self.set_col_bytes(col, &[u8::from(value)])
    }

    pub fn set_col_bit(&mut self, col: usize, bit: usize, value: bool) -> Result<()> {
        let range = self.row.cell_range(col)?;
        let cell = &mut self.bytes[range];
        let byte = cell
            .get_mut(bit / 8)
            .ok_or_else(|| bit_out_of_range(col, bit))?;
        if value {
            *byte |= 1 << (bit % 8);
        } else {
            *byte &= !(1 << (bit % 8));
        }
        Ok(())
    }
}

impl Cells for Entry {
    fn row(&self) -> &Row {
        &self.row
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.primary_key() == other.primary_key()
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary_key().hash(state);
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entry").field(&self.to_property_form()).finish()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_property_form())
    }
}

/// A record borrowed from a collection's buffer.
#[derive(Clone, Copy)]
pub struct EntryView<'a> {
    row: &'a Arc<Row>,
    bytes: &'a [u8],
}

impl<'a> EntryView<'a> {
    pub(crate) fn new(row: &'a Arc<Row>, bytes: &'a [u8]) -> Self {
        Self { row, bytes }
    }

    /// Primary key with the lifetime of the underlying buffer.
    pub fn key(&self) -> &'a [u8] {
        &self.bytes[..self.row.primary_key_length()]
    }

    /// Record bytes with the lifetime of the underlying buffer.
    pub fn raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn to_entry(&self) -> Entry {
        Entry::from_parts(Arc::clone(self.row), self.bytes.to_vec())
    }
}

impl Cells for EntryView<'_> {
    fn row(&self) -> &Row {
        self.row
    }

    fn bytes(&self) -> &[u8] {
        self.bytes
    }
}

impl fmt::Debug for EntryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryView")
            .field(&self.to_property_form())
            .finish()
    }
}
