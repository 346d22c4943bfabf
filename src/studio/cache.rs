//! Keyed lookup cache for peer-resolved values.

// ============================================================================
// Imports
// ============================================================================

use std::hash::Hash;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// ============================================================================
// LookupCache
// ============================================================================

/// Remembers values resolved through the peer.
///
/// Entries never expire on their own; the studio layer invalidates
/// wholesale when sources or scenes are rearranged.
pub(crate) struct LookupCache<K, V> {
    entries: Mutex<FxHashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> LookupCache<K, V> {
    /// Creates an empty cache.
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the cached value for `key`, if any.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Stores a value for `key`, replacing any previous entry.
    pub(crate) fn insert(&self, key: K, value: V) {
        self.entries.lock().insert(key, value);
    }

    /// Drops every entry.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_miss_then_hit() {
        let cache: LookupCache<String, u32> = LookupCache::new();

        assert_eq!(cache.get(&"camera".to_string()), None);
        cache.insert("camera".to_string(), 42);
        assert_eq!(cache.get(&"camera".to_string()), Some(42));
    }

    #[test]
    fn test_insert_replaces() {
        let cache: LookupCache<String, u32> = LookupCache::new();

        cache.insert("camera".to_string(), 1);
        cache.insert("camera".to_string(), 2);
        assert_eq!(cache.get(&"camera".to_string()), Some(2));
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache: LookupCache<(String, String), i64> = LookupCache::new();

        cache.insert(("scene".to_string(), "camera".to_string()), 7);
        cache.clear();
        assert_eq!(cache.get(&("scene".to_string(), "camera".to_string())), None);
    }
}
