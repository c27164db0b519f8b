//! Per-key bucket state and its storage seam

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Bucket state for one composite key.
///
/// `tokens` holds the available tokens for the token bucket and the current
/// water level for the leaky bucket. `previous_count` is the sliding
/// window's count for the window before `window_start`. `last_refill` is
/// refreshed on every touch, so it doubles as the last-activity timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u32,
    #[serde(default)]
    pub previous_count: u32,
    /// Epoch milliseconds
    pub window_start: i64,
    pub tokens: f64,
    /// Epoch milliseconds
    pub last_refill: i64,
}

impl RateLimitEntry {
    /// Most recent activity on this entry, epoch milliseconds
    pub fn last_seen(&self) -> i64 {
        self.window_start.max(self.last_refill)
    }

    /// Whether the entry has been idle for more than two windows
    pub fn is_stale(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms - self.last_seen() > window_ms.saturating_mul(2)
    }
}

/// Storage for rate-limit entries.
///
/// Implementations must apply `update` atomically per key; unrelated keys
/// must not serialize behind a single lock.
pub trait RateLimitStore: Send + Sync {
    /// Replace the entry under `key` with the result of `f`, which receives
    /// the current entry (`None` if absent). Returns the stored entry.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<RateLimitEntry>) -> RateLimitEntry,
    ) -> RateLimitEntry;

    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    fn remove(&self, key: &str) -> Option<RateLimitEntry>;

    /// Keep only entries for which `keep` returns true; returns how many were removed
    fn retain(&self, keep: &mut dyn FnMut(&str, &RateLimitEntry) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, for statistics
    fn snapshot(&self) -> Vec<(String, RateLimitEntry)>;
}

/// In-process store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<RateLimitEntry>) -> RateLimitEntry,
    ) -> RateLimitEntry {
        // The entry guard holds the shard lock for the whole read-modify-write
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = f(Some(*slot.get()));
                *slot.get_mut() = next;
                next
            }
            Entry::Vacant(slot) => {
                let next = f(None);
                slot.insert(next);
                next
            }
        }
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    fn remove(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &RateLimitEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| keep(key, entry));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot(&self) -> Vec<(String, RateLimitEntry)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(count: u32, at: i64) -> RateLimitEntry {
        RateLimitEntry {
            count,
            previous_count: 0,
            window_start: at,
            tokens: 0.0,
            last_refill: at,
        }
    }

    #[test]
    fn test_update_creates_then_modifies() {
        let store = MemoryStore::new();

        let created = store.update("k", &mut |current| {
            assert!(current.is_none());
            entry(1, 0)
        });
        assert_eq!(created.count, 1);

        let updated = store.update("k", &mut |current| {
            let mut e = current.unwrap();
            e.count += 1;
            e
        });
        assert_eq!(updated.count, 2);
        assert_eq!(store.get("k").unwrap().count, 2);
    }

    #[test]
    fn test_retain_reports_removed() {
        let store = MemoryStore::new();
        store.update("old", &mut |_| entry(1, 0));
        store.update("new", &mut |_| entry(1, 10_000));

        let removed = store.retain(&mut |_, e| e.last_seen() >= 5_000);
        assert_eq!(removed, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn test_staleness_is_two_windows() {
        let e = entry(3, 1_000);
        assert!(!e.is_stale(1_000 + 2_000, 1_000));
        assert!(e.is_stale(1_000 + 2_001, 1_000));
    }
}
