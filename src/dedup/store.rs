//! Time-bounded deduplication store.
//!
//! Remembers which request ids have been handled, together with an optional
//! payload (typically the reply computed the first time), until an absolute
//! expiry instant.
//!
//! Expiry cleanup:
//! - Lazy: `check`/`is_duplicate` evict the entry they find expired
//! - Swept: `purge_expired` evicts every expired entry and reports the next
//!   deadline so the owner can schedule the following sweep
//!
//! The store takes `&mut self` for every operation and is owned by a single
//! processor; sharing it across threads requires wrapping it in a mutex.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tracing::{debug, trace};

/// Callback invoked with the key and data of every entry evicted by expiry.
pub type EvictionHook<T> = Box<dyn FnMut(&str, Option<T>) + Send>;

/// One remembered id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry<T> {
    data: Option<T>,
    expire_at: Instant,
}

impl<T> DedupEntry<T> {
    /// Payload attached by the last `remember`.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Instant after which the entry is no longer honored.
    pub fn expire_at(&self) -> Instant {
        self.expire_at
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at <= now
    }
}

/// Idempotency cache keyed by request id.
pub struct DedupStore<T> {
    entries: HashMap<String, DedupEntry<T>>,
    on_evict: Option<EvictionHook<T>>,
}

impl<T> DedupStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            on_evict: None,
        }
    }

    /// Create an empty store that reports expiry evictions to `hook`.
    pub fn with_eviction_hook<F>(hook: F) -> Self
    where
        F: FnMut(&str, Option<T>) + Send + 'static,
    {
        Self {
            entries: HashMap::new(),
            on_evict: Some(Box::new(hook)),
        }
    }

    /// Insert or refresh the entry for `key`.
    ///
    /// A later call with the same key overwrites data and expiry in place.
    pub fn remember(&mut self, key: impl Into<String>, data: Option<T>, expire_at: Instant) {
        let key = key.into();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                trace!(key = %key, "refreshing deduplication entry");
                entry.data = data;
                entry.expire_at = expire_at;
            }
            None => {
                trace!(key = %key, "adding deduplication entry");
                self.entries.insert(key, DedupEntry { data, expire_at });
            }
        }
    }

    /// Look up a live entry for `key`.
    pub fn check(&mut self, key: &str) -> Option<&DedupEntry<T>> {
        self.check_at(key, Instant::now())
    }

    /// Look up a live entry for `key` at a given time.
    ///
    /// An entry found expired is evicted and reported as absent.
    pub fn check_at(&mut self, key: &str, now: Instant) -> Option<&DedupEntry<T>> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            debug!(key, "expiring deduplication entry on lookup");
            self.evict(key);
            return None;
        }
        self.entries.get(key)
    }

    /// Whether `key` was seen and its entry is still live.
    pub fn is_duplicate(&mut self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Whether `key` was seen and its entry is live at a given time.
    pub fn is_duplicate_at(&mut self, key: &str, now: Instant) -> bool {
        self.check_at(key, now).is_some()
    }

    /// Remove the entry for `key`, handing its data back.
    ///
    /// The eviction hook is not invoked. No-op when absent.
    pub fn forget(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key).and_then(|entry| entry.data)
    }

    /// Evict every expired entry.
    ///
    /// Returns the earliest expiry among the survivors, `None` when the store
    /// is empty.
    pub fn purge_expired(&mut self) -> Option<Instant> {
        self.purge_expired_at(Instant::now())
    }

    /// Evict every entry expired at `now`.
    pub fn purge_expired_at(&mut self, now: Instant) -> Option<Instant> {
        let mut next_deadline: Option<Instant> = None;
        let hook = &mut self.on_evict;

        self.entries.retain(|key, entry| {
            if entry.is_expired(now) {
                debug!(key = %key, "purging deduplication entry");
                if let Some(hook) = hook.as_mut() {
                    hook(key.as_str(), entry.data.take());
                }
                false
            } else {
                next_deadline = Some(match next_deadline {
                    Some(deadline) => deadline.min(entry.expire_at),
                    None => entry.expire_at,
                });
                true
            }
        });

        next_deadline
    }

    /// Earliest expiry among stored entries, expired or not.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.expire_at).min()
    }

    /// Whether an entry for `key` is stored, without expiring it.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self, key: &str) {
        let Some((key, entry)) = self.entries.remove_entry(key) else {
            return;
        };
        if let Some(hook) = self.on_evict.as_mut() {
            hook(key.as_str(), entry.data);
        }
    }
}

impl<T> Default for DedupStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for DedupStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupStore")
            .field("entries", &self.entries)
            .field("on_evict", &self.on_evict.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_new_store_is_empty() {
        let mut store: DedupStore<String> = DedupStore::new();
        assert!(store.is_empty());
        assert!(!store.is_duplicate("u1"));
        assert_eq!(store.purge_expired(), None);
    }

    #[test]
    fn test_remember_and_check() {
        let now = Instant::now();
        let mut store = DedupStore::new();

        store.remember("u1", Some("hi".to_string()), now + ms(5000));

        let entry = store.check_at("u1", now + ms(10)).unwrap();
        assert_eq!(entry.data().map(String::as_str), Some("hi"));
        assert!(store.is_duplicate_at("u1", now + ms(4999)));
    }

    #[test]
    fn test_remember_overwrites_in_place() {
        let now = Instant::now();
        let mut store = DedupStore::new();

        store.remember("u1", Some(1), now + ms(100));
        store.remember("u1", Some(2), now + ms(900));

        assert_eq!(store.len(), 1);
        let entry = store.check_at("u1", now + ms(500)).unwrap();
        assert_eq!(entry.data(), Some(&2));
        assert_eq!(entry.expire_at(), now + ms(900));
    }

    #[test]
    fn test_remember_without_data() {
        let now = Instant::now();
        let mut store: DedupStore<u32> = DedupStore::new();

        store.remember("u1", None, now + ms(100));

        let entry = store.check_at("u1", now).unwrap();
        assert!(entry.data().is_none());
    }

    #[test]
    fn test_lookup_at_expiry_evicts() {
        let now = Instant::now();
        let mut store = DedupStore::new();
        store.remember("k", Some(()), now + ms(5000));

        // Exactly at expire_at the entry is no longer honored
        assert!(!store.is_duplicate_at("k", now + ms(5000)));
        assert!(!store.contains("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_forget() {
        let now = Instant::now();
        let mut store = DedupStore::new();
        store.remember("k", Some(7), now + ms(1000));

        assert_eq!(store.forget("k"), Some(7));
        assert!(!store.is_duplicate_at("k", now));

        // Forgetting an absent key is a no-op
        assert_eq!(store.forget("k"), None);
        assert_eq!(store.forget("never"), None);
    }

    #[test]
    fn test_purge_removes_expired_and_returns_empty_deadline() {
        let now = Instant::now();
        let mut store = DedupStore::new();
        store.remember("k", Some(()), now + ms(5000));

        assert_eq!(store.purge_expired_at(now + ms(6000)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_returns_next_deadline() {
        let now = Instant::now();
        let mut store = DedupStore::new();
        store.remember("a", Some(1), now + ms(100));
        store.remember("b", Some(2), now + ms(300));
        store.remember("c", Some(3), now + ms(200));

        let next = store.purge_expired_at(now + ms(150));

        assert_eq!(next, Some(now + ms(200)));
        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert_eq!(store.next_deadline(), Some(now + ms(200)));
    }

    #[test]
    fn test_eviction_hook_runs_once_per_expired_entry() {
        let now = Instant::now();
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let mut store = DedupStore::with_eviction_hook(move |key: &str, data: Option<u32>| {
            sink.lock().unwrap().push((key.to_string(), data));
        });

        store.remember("lazy", Some(1), now + ms(10));
        store.remember("swept", Some(2), now + ms(10));
        store.remember("kept", Some(3), now + ms(1000));
        store.remember("forgotten", Some(4), now + ms(10));

        store.forget("forgotten");
        assert!(!store.is_duplicate_at("lazy", now + ms(20)));
        store.purge_expired_at(now + ms(20));
        store.purge_expired_at(now + ms(30));

        let evicted = evicted.lock().unwrap();
        assert_eq!(
            *evicted,
            vec![("lazy".to_string(), Some(1)), ("swept".to_string(), Some(2))]
        );
        assert!(store.contains("kept"));
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let now = Instant::now();
        let mut store = DedupStore::new();
        store.remember("k", Some(()), now + ms(100));

        // Re-armed on a later sighting
        store.remember("k", Some(()), now + ms(90) + ms(100));

        assert!(store.is_duplicate_at("k", now + ms(150)));
        assert!(!store.is_duplicate_at("k", now + ms(190)));
    }
}
