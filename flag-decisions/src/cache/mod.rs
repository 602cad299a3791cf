pub mod decision_cache;
pub mod eviction;

pub use decision_cache::{CacheEntry, CacheKey, DecisionCache};
pub use eviction::{EvictionPolicy, LeastRecentlyUsed, Unbounded};
