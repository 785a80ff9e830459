//! Frontend product-response cache: up to 5 entries, LRU eviction, LRU touch
//! on read hit. Grounded on the original's `cache` list (linear scan,
//! `pop`/`append` for both touch and eviction) rather than a hash-map-backed
//! structure, since the capacity is tiny and the original's behavior (scan
//! order, which entry gets evicted) is part of what's being reproduced.

use serde_json::Value;
use std::collections::VecDeque;

use crate::config::CACHE_CAPACITY;
use crate::rwlock::RwPreferReader;

struct Entry {
    product_name: String,
    response: Value,
}

/// Ordered from least-recently-used (front) to most-recently-used (back).
pub struct Cache {
    entries: RwPreferReader<VecDeque<Entry>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: RwPreferReader::new(VecDeque::with_capacity(CACHE_CAPACITY)),
        }
    }

    /// Look up a cached response, moving it to the most-recent position on
    /// hit (LRU touch).
    pub fn get(&self, product_name: &str) -> Option<Value> {
        let mut entries = self.entries.write();
        if let Some(pos) = entries.iter().position(|e| e.product_name == product_name) {
            let entry = entries.remove(pos).unwrap();
            let response = entry.response.clone();
            entries.push_back(entry);
            Some(response)
        } else {
            None
        }
    }

    /// Insert a freshly-fetched response, evicting the least-recently-used
    /// entry if the cache is already at capacity.
    pub fn insert(&self, product_name: String, response: Value) {
        let mut entries = self.entries.write();
        if entries.len() >= CACHE_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(Entry {
            product_name,
            response,
        });
    }

    /// Remove the entry for a product, if present. No-op otherwise.
    pub fn invalidate(&self, product_name: &str) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.product_name != product_name);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resp(n: u64) -> Value {
        json!({"data": {"quantity": n}})
    }

    #[test]
    fn evicts_least_recently_used_on_sixth_insert() {
        let cache = Cache::new();
        for (i, name) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            cache.insert(name.to_string(), resp(i as u64));
        }
        assert_eq!(cache.len(), 5);

        cache.insert("F".to_string(), resp(5));
        assert_eq!(cache.len(), 5);
        assert!(cache.get("A").is_none(), "A should have been evicted");
        assert!(cache.get("F").is_some());
    }

    #[test]
    fn hit_reorders_entry_to_most_recent() {
        let cache = Cache::new();
        for (i, name) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            cache.insert(name.to_string(), resp(i as u64));
        }
        // Touch B so it is no longer the least-recently-used entry.
        assert!(cache.get("B").is_some());
        cache.insert("F".to_string(), resp(5));
        // A was LRU before the touch and should be evicted, not B.
        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
    }

    #[test]
    fn invalidate_removes_entry_and_is_idempotent() {
        let cache = Cache::new();
        cache.insert("A".to_string(), resp(1));
        cache.invalidate("A");
        assert!(cache.get("A").is_none());
        // No-op when absent.
        cache.invalidate("A");
    }
}
