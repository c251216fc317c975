//! Per-client memoization of idempotent GET responses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use super::signing::canonical_query;

/// Entries kept before the oldest ones are evicted.
pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<String, Value>,
    order: VecDeque<String>,
}

/// Memoized GET responses keyed by path and user parameters.
///
/// Owned by exactly one client, so entries never cross credential sets.
/// Auth fields (timestamp, signature) are not part of the key. Holds at most
/// `capacity` entries; the oldest insertions are evicted first.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    /// Creates an empty cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Builds the cache key for a request.
    pub fn key(path: &str, params: &BTreeMap<String, String>) -> String {
        if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, canonical_query(params))
        }
    }

    /// Returns the memoized response for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    /// Stores (or replaces) the response for `key`.
    pub fn insert(&self, key: String, value: Value) {
        let mut entries = self.lock();
        if entries.values.insert(key.clone(), value).is_some() {
            return;
        }
        entries.order.push_back(key);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.values.remove(&oldest);
            }
        }
    }

    /// Drops every memoized response.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.values.clear();
        entries.order.clear();
    }

    /// Number of memoized responses.
    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    /// Returns true when nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A poisoned cache only holds plain JSON values; keep using it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
