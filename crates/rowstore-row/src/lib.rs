//! Fixed-width record schema for rowstore.
//!
//! This crate provides:
//! - `Column`: one typed, fixed-width cell and its definition mini-language
//! - `Row`: an ordered list of columns with the primary key in column 0
//! - `Entry` / `EntryView`: owned and borrowed records with typed accessors

mod column;
mod entry;
mod row;

pub use column::{CellType, Column, Encoder};
pub use entry::{Cells, Entry, EntryView};
pub use row::Row;
