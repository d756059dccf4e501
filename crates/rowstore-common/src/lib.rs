//! rowstore common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all rowstore components.

pub mod config;
pub mod error;
pub mod memory;
pub mod order;

pub use config::{CacheConfig, CollectionConfig, IndexConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use memory::{FixedMemory, MemoryOracle, SystemMemory};
pub use order::ByteOrder;
