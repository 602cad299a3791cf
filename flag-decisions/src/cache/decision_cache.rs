use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::eviction::{EvictionPolicy, Unbounded};
use crate::time::TimeSource;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub flag_key: String,
}

impl CacheKey {
    pub fn new(tenant_id: impl Into<String>, flag_key: impl Into<String>) -> CacheKey {
        CacheKey {
            tenant_id: tenant_id.into(),
            flag_key: flag_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub value: bool,
    /// Milliseconds at write
    pub timestamp: i64,
    pub ttl_seconds: f64,
}

impl CacheEntry {
    /// A zero TTL entry stays readable until the clock moves past the write instant.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis as f64 > self.timestamp as f64 + self.ttl_seconds * 1000.0
    }
}

/// In-memory cache of flag decisions keyed by `(tenant_id, flag_key)`.
///
/// Entries expire lazily: the TTL is only checked when an entry is read, and an
/// expired entry is dropped by that read. There is no background sweep. Keys
/// are used verbatim, so `"Tenant"` and `"tenant"` are distinct.
///
/// The cache never talks to the flag store; it only remembers what the
/// evaluator told it.
pub struct DecisionCache {
    entries: DashMap<CacheKey, CacheEntry>,
    default_ttl_seconds: f64,
    time_source: Arc<dyn TimeSource + Send + Sync>,
    eviction: Box<dyn EvictionPolicy + Send + Sync>,
}

impl DecisionCache {
    pub fn new(default_ttl_seconds: f64, time_source: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self::with_eviction(default_ttl_seconds, time_source, Box::new(Unbounded))
    }

    pub fn with_eviction(
        default_ttl_seconds: f64,
        time_source: Arc<dyn TimeSource + Send + Sync>,
        eviction: Box<dyn EvictionPolicy + Send + Sync>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl_seconds,
            time_source,
            eviction,
        }
    }

    pub fn get(&self, tenant_id: &str, flag_key: &str) -> Option<bool> {
        let key = CacheKey::new(tenant_id, flag_key);
        let now = self.time_source.now_millis();

        // remove_if holds the shard lock while checking, so a concurrent set
        // for the same key can't be dropped by a stale expiry check
        if self
            .entries
            .remove_if(&key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.eviction.on_remove(&key);
            return None;
        }

        let value = self.entries.get(&key).map(|entry| entry.value);
        if value.is_some() {
            self.eviction.on_access(&key);
        }
        value
    }

    pub fn set(&self, tenant_id: &str, flag_key: &str, value: bool, ttl_seconds: Option<f64>) {
        let key = CacheKey::new(tenant_id, flag_key);
        let entry = CacheEntry {
            value,
            timestamp: self.time_source.now_millis(),
            ttl_seconds: ttl_seconds.unwrap_or(self.default_ttl_seconds),
        };

        self.entries.insert(key.clone(), entry);
        for victim in self.eviction.on_insert(&key) {
            self.entries.remove(&victim);
        }
    }

    pub fn invalidate(&self, tenant_id: &str, flag_key: &str) {
        self.remove_key(&CacheKey::new(tenant_id, flag_key));
    }

    /// Drops every decision cached for one tenant.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.remove_matching(|key| key.tenant_id == tenant_id);
    }

    /// Drops every tenant's decision for one flag.
    pub fn invalidate_flag(&self, flag_key: &str) {
        self.remove_matching(|key| key.flag_key == flag_key);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.eviction.clear();
    }

    /// Number of stored entries, including expired ones nobody has read yet.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn default_ttl_seconds(&self) -> f64 {
        self.default_ttl_seconds
    }

    fn remove_key(&self, key: &CacheKey) {
        if self.entries.remove(key).is_some() {
            self.eviction.on_remove(key);
        }
    }

    fn remove_matching(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            self.remove_key(&key);
        }
    }
}
