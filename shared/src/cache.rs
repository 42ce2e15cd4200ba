//! In-process history cache

use crate::models::{CacheEntry, CacheKey};
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-lifetime map from series key to the last successful fetch.
///
/// Writes are whole-entry overwrites; concurrent writers to one key race and
/// the last completed write wins.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl CacheStore {
    /// Create new store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an entry
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Insert or replace an entry
    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, entry);
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
