use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("The cache key cannot be empty.")]
    EmptyKey,

    #[error("Key not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Default)]
/// The worker's in-memory image store.
///
/// Entries are immutable byte buffers keyed by the fingerprint of the source URL.
/// Nothing is ever evicted, the cache lives exactly as long as the process.
///
/// Readers share the lock, `set` and `remove` take it exclusively for the
/// duration of a single map operation only.
pub struct NodeCache {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the value, replacing whatever was stored under the key before.
    pub fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        check_key(key)?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        check_key(key)?;
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    /// Removes the key, removing a key which is not present is not an error.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        check_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }
}

#[inline]
fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        Err(CacheError::EmptyKey)
    } else {
        Ok(())
    }
}
