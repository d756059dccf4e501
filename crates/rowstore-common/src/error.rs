//! Error types for rowstore.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in rowstore operations.
#[derive(Debug, Error)]
pub enum StoreError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Resource errors
    #[error("Resource exceeded: needed {needed} bytes, available {available} bytes at {timestamp}")]
    ResourceExceeded {
        needed: u64,
        available: u64,
        timestamp: DateTime<Utc>,
    },

    // Schema errors
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    #[error("Column {column} out of range ({columns} columns)")]
    ColumnOutOfRange { column: usize, columns: usize },

    #[error("Column {column} encoding error: {reason}")]
    ColumnEncoding { column: usize, reason: String },

    #[error("Key size mismatch: expected {expected}, got {actual}")]
    KeySize { expected: usize, actual: usize },

    // Record errors
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Order mismatch: expected {expected}, got {actual}")]
    OrderMismatch { expected: String, actual: String },

    // Initializer errors
    #[error("Initializer closed before completion")]
    InitializerClosed,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Builds a `ResourceExceeded` stamped with the current time.
    pub fn resource_exceeded(needed: u64, available: u64) -> Self {
        StoreError::ResourceExceeded {
            needed,
            available,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this error reports refused memory growth.
    pub fn is_resource_exceeded(&self) -> bool {
        matches!(self, StoreError::ResourceExceeded { .. })
    }
}
