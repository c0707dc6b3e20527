//! Row and response types for the documentation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One documentation entry (row of `webdna_instructions`).
///
/// `id` is the store's numeric key; `source_id` is the stable external
/// identifier scraped from the documentation site; `name` is the human
/// instruction name used as a lookup alias. Source id and name are each
/// unique when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocEntry {
    pub id: i64,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub syntax: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub examples: Option<String>,
    /// Ids of related entries, resolved to full rows by `get_by_key`.
    #[serde(default, rename = "related_instructions")]
    pub related_ids: Vec<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One category (row of `webdna_categories`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A search result with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub entry: DocEntry,
    pub relevance: f64,
}

/// The result page for a search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
}

impl SearchResponse {
    /// An empty page, returned for blank queries and zero matches.
    pub fn empty(offset: usize, limit: usize) -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
            offset,
            limit,
        }
    }
}

/// A fully resolved documentation entry: the row plus its category name
/// and the related entries looked up by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocDetail {
    #[serde(flatten)]
    pub entry: DocEntry,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub related: Vec<DocEntry>,
}

/// A category with its entry count for `get-webdna-categories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub instruction_count: usize,
}

/// Store-wide statistics for `get-webdna-stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_instructions: u64,
    pub total_categories: usize,
    pub generated_at: DateTime<Utc>,
}
