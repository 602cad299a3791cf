use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::cache::CacheKey;

/// Capacity strategy plugged into the decision cache. The cache itself only
/// ever expires lazily; a policy decides which live entries to drop when the
/// cache grows past a bound.
pub trait EvictionPolicy {
    /// Called after `key` was written. Returns the keys the cache must drop.
    fn on_insert(&self, key: &CacheKey) -> Vec<CacheKey>;
    fn on_access(&self, key: &CacheKey);
    fn on_remove(&self, key: &CacheKey);
    fn clear(&self);
}

/// Never evicts. Memory is bounded only by invalidation and lazy expiry.
#[derive(Debug, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn on_insert(&self, _key: &CacheKey) -> Vec<CacheKey> {
        Vec::new()
    }

    fn on_access(&self, _key: &CacheKey) {}

    fn on_remove(&self, _key: &CacheKey) {}

    fn clear(&self) {}
}

/// Keeps at most `capacity` keys, dropping the least recently read or written.
pub struct LeastRecentlyUsed {
    order: Mutex<LruCache<CacheKey, ()>>,
}

impl LeastRecentlyUsed {
    pub fn new(capacity: NonZeroUsize) -> LeastRecentlyUsed {
        LeastRecentlyUsed {
            order: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn order(&self) -> MutexGuard<'_, LruCache<CacheKey, ()>> {
        // The guarded data is only recency bookkeeping, a poisoned lock is still usable
        self.order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EvictionPolicy for LeastRecentlyUsed {
    fn on_insert(&self, key: &CacheKey) -> Vec<CacheKey> {
        let mut order = self.order();
        if order.contains(key) {
            order.promote(key);
            return Vec::new();
        }

        order
            .push(key.clone(), ())
            .map(|(evicted, _)| vec![evicted])
            .unwrap_or_default()
    }

    fn on_access(&self, key: &CacheKey) {
        self.order().promote(key);
    }

    fn on_remove(&self, key: &CacheKey) {
        self.order().pop(key);
    }

    fn clear(&self) {
        self.order().clear();
    }
}

/// Maps the `CACHE_MAX_ENTRIES` setting onto a policy, zero meaning unbounded.
pub fn policy_for_capacity(max_entries: usize) -> Box<dyn EvictionPolicy + Send + Sync> {
    match NonZeroUsize::new(max_entries) {
        Some(capacity) => Box::new(LeastRecentlyUsed::new(capacity)),
        None => Box::new(Unbounded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(flag: &str) -> CacheKey {
        CacheKey::new("tenant", flag)
    }

    #[test]
    fn test_unbounded_never_names_victims() {
        let policy = Unbounded;
        for i in 0..100 {
            assert!(policy.on_insert(&key(&format!("flag-{i}"))).is_empty());
        }
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let policy = LeastRecentlyUsed::new(NonZeroUsize::new(2).unwrap());
        assert!(policy.on_insert(&key("a")).is_empty());
        assert!(policy.on_insert(&key("b")).is_empty());

        // reading "a" makes "b" the eviction candidate
        policy.on_access(&key("a"));
        assert_eq!(policy.on_insert(&key("c")), vec![key("b")]);
    }

    #[test]
    fn test_lru_rewrite_of_existing_key_evicts_nothing() {
        let policy = LeastRecentlyUsed::new(NonZeroUsize::new(1).unwrap());
        assert!(policy.on_insert(&key("a")).is_empty());
        assert!(policy.on_insert(&key("a")).is_empty());
    }

    #[test]
    fn test_lru_forgets_removed_keys() {
        let policy = LeastRecentlyUsed::new(NonZeroUsize::new(1).unwrap());
        policy.on_insert(&key("a"));
        policy.on_remove(&key("a"));
        assert!(policy.on_insert(&key("b")).is_empty());
    }

    #[test]
    fn test_policy_for_capacity() {
        let unbounded = policy_for_capacity(0);
        assert!(unbounded.on_insert(&key("a")).is_empty());
        assert!(unbounded.on_insert(&key("b")).is_empty());

        let bounded = policy_for_capacity(1);
        assert!(bounded.on_insert(&key("a")).is_empty());
        assert_eq!(bounded.on_insert(&key("b")), vec![key("a")]);
    }
}
