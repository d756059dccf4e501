//! In-memory record indexes for rowstore.
//!
//! This crate provides keyed storage built on fixed-width rows:
//! - `RowCollection`, a growable record buffer with a hybrid parallel sort
//! - `RowSet`, a keyed set over a collection with a lazily sorted tail
//! - `RamIndex` and `RamIndexCluster`, two-generation and hash-sharded indexes
//! - `HandleMap` and `HandleSet`, key to handle maps and key sets with flat dumps
//! - `Cache` and `BufferedObjectIndex`, read caching and write buffering over any `Index`

mod buffered;
mod cache;
mod cluster;
mod collection;
mod flat;
mod handle_map;
mod handle_set;
mod index;
mod merge;
mod ram;
mod rowset;
mod sort;

pub use buffered::{BufferStats, BufferedObjectIndex};
pub use cache::{Cache, CacheStats};
pub use cluster::RamIndexCluster;
pub use collection::{RowCollection, EXPORT_OVERHEAD};
pub use handle_map::{HandleMap, HandleMapInitializer, PendingHandleMap};
pub use handle_set::{HandleSet, JoinStrategy};
pub use index::{Index, KeyIter, RowIter};
pub use merge::{merge_all, MergeIter, MergeKey};
pub use ram::RamIndex;
pub use rowset::{RowSet, Rows};
pub use sort::SortPool;
