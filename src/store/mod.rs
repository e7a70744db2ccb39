//! Store Module
//!
//! In-memory key-value map that the transaction log rebuilds on startup.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Concurrent readers, exclusive writers
//! - Report missing keys as [`LogError::NoSuchKey`](crate::LogError::NoSuchKey)
//!
//! The recovery coordinator only needs the [`KeyValueStore`] trait, so any
//! other map can be rebuilt from a log the same way.

mod table;

pub use table::MemoryStore;

use crate::error::Result;

/// Mutations the recovery coordinator applies while replaying a log
pub trait KeyValueStore: Send + Sync {
    /// Look up a key
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;
}
