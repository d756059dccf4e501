//! Adaptive replacement caches.
//!
//! `SimpleArc` keeps a generation of entries seen once and a generation of
//! entries read back, so one-shot inserts cannot flush the working set.
//! `ConcurrentArc` hash-partitions keys over several `SimpleArc`s.

mod arc;

pub use arc::{AdaptiveCache, ConcurrentArc, SimpleArc};
