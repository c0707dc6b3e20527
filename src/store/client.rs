//! HTTP client for the documentation store.
//!
//! The store is a PostgREST-style REST surface over the relational
//! schema (two tables plus a precomputed full-text search vector). All
//! reads go through here; the TTL cache sits one layer up in `DocStore`.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::store::types::{Category, DocDetail, DocEntry, SearchHit, SearchResponse};
use crate::VERSION;

const INSTRUCTIONS_TABLE: &str = "webdna_instructions";
const CATEGORIES_TABLE: &str = "webdna_categories";

/// Cap on each of the two underlying search lookups before merging.
const FETCH_WINDOW: usize = 100;

/// Parameters for a documentation search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            category: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Low-level REST client for the documentation store.
#[derive(Debug, Clone)]
pub struct StoreClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StoreClient {
    /// Create a new store client.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("webdna-mcp/{} (rust)", VERSION))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url.trim_end_matches('/'), table)
    }

    /// Fetch rows from a table. Any non-success status propagates as a
    /// tagged store error, never as "not found".
    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .client
            .get(self.rest_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse store response: {}", e)))
    }

    /// Search entries: substring match on the canonical name merged with a
    /// ranked full-text match against the search vector.
    pub async fn search(
        &self,
        params: &SearchParams,
        category_id: Option<i64>,
    ) -> Result<SearchResponse> {
        let query = params.query.trim();
        if query.is_empty() {
            return Ok(SearchResponse::empty(params.offset, params.limit));
        }

        let mut substring_query = vec![
            ("select", "*".to_string()),
            ("name", format!("ilike.*{}*", query)),
            ("limit", FETCH_WINDOW.to_string()),
        ];
        let mut fulltext_query = vec![
            ("select", "*".to_string()),
            ("search_vector", format!("fts.{}", query)),
            ("limit", FETCH_WINDOW.to_string()),
        ];
        if let Some(id) = category_id {
            substring_query.push(("category_id", format!("eq.{}", id)));
            fulltext_query.push(("category_id", format!("eq.{}", id)));
        }

        let substring: Vec<DocEntry> = self
            .get_rows(INSTRUCTIONS_TABLE, &substring_query)
            .await?;
        let fulltext: Vec<DocEntry> = self.get_rows(INSTRUCTIONS_TABLE, &fulltext_query).await?;

        Ok(merge_results(
            substring,
            fulltext,
            query,
            params.offset,
            params.limit,
        ))
    }

    /// Resolve an entry by store id, source id, or instruction name, in
    /// that precedence order. `None` when nothing resolves.
    pub async fn get_by_key(&self, key: &str) -> Result<Option<DocDetail>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }

        let entry = if key.bytes().all(|b| b.is_ascii_digit()) {
            self.find_one(("id", format!("eq.{}", key))).await?
        } else {
            match self.find_one(("source_id", format!("eq.{}", key))).await? {
                Some(entry) => Some(entry),
                // ilike with no wildcard: case-insensitive name equality.
                None => self.find_one(("name", format!("ilike.{}", key))).await?,
            }
        };

        let Some(entry) = entry else {
            return Ok(None);
        };

        let related = if entry.related_ids.is_empty() {
            Vec::new()
        } else {
            let ids = entry
                .related_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            self.get_rows(
                INSTRUCTIONS_TABLE,
                &[("select", "*".to_string()), ("id", format!("in.({})", ids))],
            )
            .await?
        };

        let category = match entry.category_id {
            Some(id) => {
                let rows: Vec<Category> = self
                    .get_rows(
                        CATEGORIES_TABLE,
                        &[("select", "*".to_string()), ("id", format!("eq.{}", id))],
                    )
                    .await?;
                rows.into_iter().next().map(|c| c.name)
            }
            None => None,
        };

        Ok(Some(DocDetail {
            entry,
            category,
            related,
        }))
    }

    async fn find_one(&self, filter: (&str, String)) -> Result<Option<DocEntry>> {
        let rows: Vec<DocEntry> = self
            .get_rows(
                INSTRUCTIONS_TABLE,
                &[("select", "*".to_string()), filter, ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// All categories, ordered by name.
    pub async fn fetch_categories(&self) -> Result<Vec<Category>> {
        self.get_rows(
            CATEGORIES_TABLE,
            &[
                ("select", "*".to_string()),
                ("order", "name.asc".to_string()),
            ],
        )
        .await
    }

    /// The `category_id` projection of every entry, for client-side
    /// grouping into per-category counts.
    pub async fn fetch_category_ids(&self) -> Result<Vec<Option<i64>>> {
        #[derive(Deserialize)]
        struct Row {
            category_id: Option<i64>,
        }

        let rows: Vec<Row> = self
            .get_rows(
                INSTRUCTIONS_TABLE,
                &[("select", "category_id".to_string())],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.category_id).collect())
    }

    /// A sample of entries. The REST surface offers no random ordering, so
    /// this is the documented deterministic approximation: newest ids first.
    pub async fn sample(&self, limit: usize) -> Result<Vec<DocEntry>> {
        self.get_rows(
            INSTRUCTIONS_TABLE,
            &[
                ("select", "*".to_string()),
                ("order", "id.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// Total entry count via `Prefer: count=exact` and the Content-Range
    /// response header, without transferring rows.
    pub async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .get(self.rest_url(INSTRUCTIONS_TABLE))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .query(&[("select", "id")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(status.as_u16(), body));
        }

        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Internal("store response missing Content-Range".to_string()))?;

        parse_content_range_total(content_range)
            .ok_or_else(|| Error::Internal(format!("unparseable Content-Range: {}", content_range)))
    }

    /// Upsert entries by source id (scraper path).
    pub async fn upsert_entries(&self, rows: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.rest_url(INSTRUCTIONS_TABLE))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates")
            .query(&[("on_conflict", "source_id")])
            .json(rows)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(status.as_u16(), body));
        }
        Ok(())
    }

    /// Upsert categories by name (scraper path).
    pub async fn upsert_categories(&self, rows: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.rest_url(CATEGORIES_TABLE))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates")
            .query(&[("on_conflict", "name")])
            .json(rows)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(status.as_u16(), body));
        }
        Ok(())
    }
}

/// Merge the two lookups. Substring matches score 1.0 and always outrank
/// full-text matches, which score 0.5 plus 0.3 if the query appears in
/// the name and 0.1 if it appears in the description. First occurrence
/// wins on de-dup, so a substring match shadows the full-text row for the
/// same id.
fn merge_results(
    substring: Vec<DocEntry>,
    fulltext: Vec<DocEntry>,
    query: &str,
    offset: usize,
    limit: usize,
) -> SearchResponse {
    let query_lc = query.to_lowercase();
    let mut seen = std::collections::HashSet::new();
    let mut hits: Vec<SearchHit> = Vec::with_capacity(substring.len() + fulltext.len());

    for entry in substring {
        if seen.insert(entry.id) {
            hits.push(SearchHit {
                entry,
                relevance: 1.0,
            });
        }
    }

    for entry in fulltext {
        if !seen.insert(entry.id) {
            continue;
        }
        let mut relevance = 0.5;
        if contains_ci(entry.name.as_deref(), &query_lc) {
            relevance += 0.3;
        }
        if contains_ci(entry.description.as_deref(), &query_lc) {
            relevance += 0.1;
        }
        hits.push(SearchHit { entry, relevance });
    }

    hits.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_count = hits.len();
    let results: Vec<SearchHit> = hits.into_iter().skip(offset).take(limit).collect();

    SearchResponse {
        results,
        total_count,
        offset,
        limit,
    }
}

fn contains_ci(field: Option<&str>, query_lc: &str) -> bool {
    field.is_some_and(|s| s.to_lowercase().contains(query_lc))
}

/// Total from a PostgREST Content-Range header (`0-0/57` or `*/0`).
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.parse().ok()
}
