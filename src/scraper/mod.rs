//! Documentation site scraper (the `scrape` subcommand).
//!
//! Walks the instruction index sequentially with a fixed delay between
//! page fetches, extracts each instruction's fields from the page
//! structure, and upserts the rows into the store keyed by source id so
//! re-runs refresh rather than duplicate.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::StoreClient;
use crate::VERSION;

/// Rows per upsert batch.
const UPSERT_CHUNK: usize = 50;

/// One instruction as extracted from its documentation page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedDoc {
    pub source_id: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub syntax: Option<String>,
    pub parameters: Option<String>,
    pub examples: Option<String>,
}

/// Scrape the documentation site into the store.
pub async fn run(config: &Config, base_url: &str, delay_ms: u64) -> Result<()> {
    let store = StoreClient::new(&config.store_url, &config.store_key)?;
    let http = Client::builder()
        .user_agent(format!("webdna-mcp/{} (scraper)", VERSION))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

    let base = base_url.trim_end_matches('/').to_string();
    let delay = Duration::from_millis(delay_ms);

    info!(base = %base, delay_ms, "scraping documentation index");
    let index_html = fetch_page(&http, &base).await?;
    let links = collect_instruction_links(&index_html, &base);
    info!(pages = links.len(), "instruction pages discovered");

    let mut docs = Vec::new();
    for (i, (url, source_id)) in links.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        let html = match fetch_page(&http, url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, "skipping page: {}", e);
                continue;
            }
        };
        match parse_instruction_page(&html, source_id) {
            Some(doc) => docs.push(doc),
            None => warn!(url = %url, "page has no recognizable instruction"),
        }
    }

    info!(scraped = docs.len(), "upserting into the store");
    upload(&store, &docs).await?;
    info!("scrape complete");
    Ok(())
}

async fn fetch_page(http: &Client, url: &str) -> Result<String> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::store(status.as_u16(), format!("GET {}", url)));
    }
    Ok(response.text().await?)
}

/// Upsert categories first (by name), then entries (by source id) with
/// their resolved category ids, in fixed-size batches.
async fn upload(store: &StoreClient, docs: &[ScrapedDoc]) -> Result<()> {
    let category_names: BTreeSet<&str> = docs
        .iter()
        .filter_map(|d| d.category.as_deref())
        .collect();
    if !category_names.is_empty() {
        let rows: Vec<_> = category_names
            .iter()
            .map(|name| json!({"name": name}))
            .collect();
        store.upsert_categories(&json!(rows)).await?;
    }

    let category_ids: HashMap<String, i64> = store
        .fetch_categories()
        .await?
        .into_iter()
        .map(|c| (c.name.to_lowercase(), c.id))
        .collect();

    for chunk in docs.chunks(UPSERT_CHUNK) {
        let rows: Vec<_> = chunk
            .iter()
            .map(|doc| {
                let category_id = doc
                    .category
                    .as_ref()
                    .and_then(|name| category_ids.get(&name.to_lowercase()));
                json!({
                    "source_id": doc.source_id,
                    "name": doc.name,
                    "category_id": category_id,
                    "description": doc.description,
                    "syntax": doc.syntax,
                    "parameters": doc.parameters,
                    "examples": doc.examples,
                })
            })
            .collect();
        store.upsert_entries(&json!(rows)).await?;
    }
    Ok(())
}

/// Static selectors; a parse failure here is a programming error.
fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("valid selector")
}

/// Instruction links on the index page: absolutized, deduplicated by
/// source id (the last path segment), in document order.
fn collect_instruction_links(html: &str, base: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let anchors = sel("a[href]");

    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    for anchor in doc.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains("instruction") {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}/{}", base, href.trim_start_matches('/'))
        };
        let Some(source_id) = source_id_from_url(&url) else {
            continue;
        };
        if seen.insert(source_id.clone()) {
            links.push((url, source_id));
        }
    }
    links
}

/// The stable external identifier: the URL's last non-empty path segment,
/// stripped of any extension.
fn source_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let id = segment.split('.').next()?.trim().to_lowercase();
    if id.is_empty() || id == "instructions" {
        None
    } else {
        Some(id)
    }
}

/// Extract one instruction from its page. The name comes from the first
/// `h1`; the description is the prose before the first section heading;
/// syntax, parameters and examples come from their labeled sections. A
/// page without an `h1` is not an instruction page.
fn parse_instruction_page(html: &str, source_id: &str) -> Option<ScrapedDoc> {
    let doc = Html::parse_document(html);

    let name = doc
        .select(&sel("h1"))
        .next()
        .map(|h| element_text(&h))
        .filter(|t| !t.is_empty())?;

    let category = doc
        .select(&sel(".category, nav .breadcrumb li:last-child, [data-category]"))
        .next()
        .map(|el| {
            el.value()
                .attr("data-category")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(&el))
        })
        .filter(|t| !t.is_empty());

    let description = doc
        .select(&sel("h1 ~ p"))
        .next()
        .map(|p| element_text(&p))
        .filter(|t| !t.is_empty());

    Some(ScrapedDoc {
        source_id: source_id.to_string(),
        name,
        category,
        description,
        syntax: section_text(&doc, "syntax"),
        parameters: section_text(&doc, "parameter"),
        examples: section_text(&doc, "example"),
    })
}

/// The text of the section introduced by the first `h2`/`h3` whose title
/// contains `keyword` (case-insensitive): every sibling up to the next
/// heading, joined by newlines.
fn section_text(doc: &Html, keyword: &str) -> Option<String> {
    let headings = sel("h2, h3");
    let heading = doc
        .select(&headings)
        .find(|h| element_text(h).to_lowercase().contains(keyword))?;

    let mut parts = Vec::new();
    for sibling in heading.next_siblings() {
        let Some(el) = ElementRef::wrap(sibling) else {
            continue;
        };
        let tag = el.value().name();
        if tag == "h2" || tag == "h3" {
            break;
        }
        let text = element_text(&el);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}
