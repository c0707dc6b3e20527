//! Documentation store access: typed queries plus the read-through cache.

pub mod cache;
pub mod client;
pub mod types;

pub use client::{SearchParams, StoreClient};
pub use types::{Category, CategorySummary, DocDetail, DocEntry, SearchHit, SearchResponse, StoreStats};

use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::error::Result;
use crate::store::cache::QueryCache;

/// Per-operation cache TTLs.
#[derive(Debug, Clone)]
pub struct CacheTtl {
    pub search: Duration,
    pub get: Duration,
    pub categories: Duration,
    pub count: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(5 * 60),
            get: Duration::from_secs(15 * 60),
            categories: Duration::from_secs(30 * 60),
            count: Duration::from_secs(60 * 60),
        }
    }
}

impl CacheTtl {
    /// One TTL for every operation kind (the config override path).
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            search: ttl,
            get: ttl,
            categories: ttl,
            count: ttl,
        }
    }
}

/// Cache-wrapped facade over the store client. Every read except the
/// random sample goes through the TTL cache, keyed by operation name plus
/// normalized arguments.
pub struct DocStore {
    client: StoreClient,
    cache: QueryCache,
    ttl: CacheTtl,
}

impl DocStore {
    pub fn new(client: StoreClient, ttl: CacheTtl) -> Self {
        Self {
            client,
            cache: QueryCache::new(),
            ttl,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = StoreClient::new(&config.store_url, &config.store_key)?;
        let ttl = match config.cache_ttl_override {
            Some(d) => CacheTtl::uniform(d),
            None => CacheTtl::default(),
        };
        Ok(Self::new(client, ttl))
    }

    /// The underlying REST client (scraper upsert path).
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    /// Search the documentation, cached for the search TTL. An unknown
    /// category name yields an empty page without querying entries.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse> {
        let key = format!(
            "search:{}:{}:{}:{}",
            params.query.trim().to_lowercase(),
            params
                .category
                .as_deref()
                .unwrap_or_default()
                .to_lowercase(),
            params.limit,
            params.offset
        );
        if let Some(hit) = self.cache.get(&key, self.ttl.search).await {
            return Ok(serde_json::from_value(hit)?);
        }

        let category_id = match &params.category {
            Some(name) => match self.resolve_category_id(name).await? {
                Some(id) => Some(id),
                None => return Ok(SearchResponse::empty(params.offset, params.limit)),
            },
            None => None,
        };

        let page = self.client.search(params, category_id).await?;
        self.cache.put(key, serde_json::to_value(&page)?).await;
        Ok(page)
    }

    /// Resolve one entry by store id, source id, or name. Not-found is a
    /// cached `None`, distinct from store faults which propagate as errors.
    /// The source_id lookup is case-sensitive, so the cache key keeps the
    /// key's original case.
    pub async fn get_by_key(&self, raw_key: &str) -> Result<Option<DocDetail>> {
        let key = format!("get:{}", raw_key.trim());
        if let Some(hit) = self.cache.get(&key, self.ttl.get).await {
            return Ok(serde_json::from_value(hit)?);
        }

        let detail = self.client.get_by_key(raw_key).await?;
        self.cache.put(key, serde_json::to_value(&detail)?).await;
        Ok(detail)
    }

    /// Categories with per-category entry counts, cached for the
    /// categories TTL.
    pub async fn list_categories(&self) -> Result<Vec<CategorySummary>> {
        if let Some(hit) = self.cache.get("categories", self.ttl.categories).await {
            return Ok(serde_json::from_value(hit)?);
        }

        let categories = self.client.fetch_categories().await?;
        let ids = self.client.fetch_category_ids().await?;

        let mut counts = std::collections::HashMap::new();
        for id in ids.into_iter().flatten() {
            *counts.entry(id).or_insert(0usize) += 1;
        }

        let summaries: Vec<CategorySummary> = categories
            .into_iter()
            .map(|c| CategorySummary {
                instruction_count: counts.get(&c.id).copied().unwrap_or(0),
                id: c.id,
                name: c.name,
                description: c.description,
            })
            .collect();

        self.cache
            .put("categories".to_string(), serde_json::to_value(&summaries)?)
            .await;
        Ok(summaries)
    }

    /// A sample of entries, never cached. Deterministic approximation of
    /// randomness: newest store ids first (see DESIGN.md).
    pub async fn random_sample(&self, limit: usize) -> Result<Vec<DocEntry>> {
        self.client.sample(limit).await
    }

    /// Total entry count, cached for the count TTL.
    pub async fn count(&self) -> Result<u64> {
        if let Some(hit) = self.cache.get("count", self.ttl.count).await {
            return Ok(serde_json::from_value(hit)?);
        }

        let total = self.client.count().await?;
        self.cache
            .put("count".to_string(), serde_json::to_value(total)?)
            .await;
        Ok(total)
    }

    /// Store statistics, composed from the (individually cached) count and
    /// category listing.
    pub async fn stats(&self) -> Result<StoreStats> {
        let total_instructions = self.count().await?;
        let total_categories = self.list_categories().await?.len();
        Ok(StoreStats {
            total_instructions,
            total_categories,
            generated_at: Utc::now(),
        })
    }

    async fn resolve_category_id(&self, name: &str) -> Result<Option<i64>> {
        let name_lc = name.trim().to_lowercase();
        Ok(self
            .list_categories()
            .await?
            .into_iter()
            .find(|c| c.name.to_lowercase() == name_lc)
            .map(|c| c.id))
    }
}
