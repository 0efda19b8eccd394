//! Persistence layer for noesis.
//!
//! The in-memory stores ([`TripleStore`](crate::graph::store::TripleStore),
//! [`PatternStore`](crate::pattern::PatternStore),
//! [`HyperGraph`](crate::hyper::HyperGraph)) own their records and indexes.
//! When the engine runs with a data directory they write through to a shared
//! [`DurableStore`] before a record becomes visible, and reload from it on
//! startup.

pub mod durable;

pub use durable::{DurableStore, RecordTable};

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
