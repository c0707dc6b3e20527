//! In-process read cache for store queries.
//!
//! Keyed by a deterministic signature of operation name plus normalized
//! arguments; each read supplies its own TTL, so one cache serves every
//! operation kind. Entries persist for process lifetime and are only ever
//! replaced by a fresh fill; staleness is checked on read. A capacity
//! bound would be an extension layered on top, not a change here.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry {
    value: Value,
    captured: Instant,
}

/// Signature-keyed TTL cache. Single-writer discipline is not required:
/// concurrent fills for the same signature are tolerated, last writer wins.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached value, if one exists and is younger than `ttl`.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.captured.elapsed() >= ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Record a fresh result for `key`.
    pub async fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                captured: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = QueryCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.get("search:sql", ttl).await.is_none());

        cache.put("search:sql".to_string(), json!({"total_count": 3})).await;
        let hit = cache.get("search:sql", ttl).await.unwrap();
        assert_eq!(hit["total_count"], 3);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_always_stale() {
        let cache = QueryCache::new();
        cache.put("count".to_string(), json!(42)).await;

        assert!(cache.get("count", Duration::ZERO).await.is_none());
        // The stale entry stays resident until overwritten.
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_signatures_do_not_collide() {
        let cache = QueryCache::new();
        let ttl = Duration::from_secs(60);

        cache.put("search:sql:0:20".to_string(), json!(1)).await;
        cache.put("search:sql:20:20".to_string(), json!(2)).await;

        assert_eq!(cache.get("search:sql:0:20", ttl).await, Some(json!(1)));
        assert_eq!(cache.get("search:sql:20:20", ttl).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_refill_replaces_value() {
        let cache = QueryCache::new();
        let ttl = Duration::from_secs(60);

        cache.put("k".to_string(), json!("old")).await;
        cache.put("k".to_string(), json!("new")).await;

        assert_eq!(cache.get("k", ttl).await, Some(json!("new")));
        assert_eq!(cache.len().await, 1);
    }
}
