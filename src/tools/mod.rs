//! The WebDNA documentation tool catalog and dispatch.
//!
//! The registry is a static list of descriptors used for `tools`
//! responses and introspection; it enforces no argument validation of its
//! own. Dispatch maps tool names onto `DocStore` operations.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::ToolDescriptor;
use crate::store::{DocStore, SearchParams};

/// Default size of a random sample.
const DEFAULT_SAMPLE_LIMIT: usize = 5;

/// The static tool catalog.
pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "search-webdna-docs".to_string(),
            description: "Search WebDNA instruction documentation. Name matches rank above \
                          full-text matches. Returns a scored, paginated result list."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search terms (instruction name or free text)"
                    },
                    "category": {
                        "type": "string",
                        "description": "Optional category name to filter by"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results per page",
                        "default": 20
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Pagination offset",
                        "default": 0
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDescriptor {
            name: "get-webdna-doc".to_string(),
            description: "Fetch one instruction by store id, source id, or instruction name, \
                          with its category and related instructions."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "Store id (numeric), source id, or instruction name"
                    }
                },
                "required": ["id"]
            }),
        },
        ToolDescriptor {
            name: "get-webdna-categories".to_string(),
            description: "List documentation categories with per-category instruction counts."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDescriptor {
            name: "get-random-webdna-docs".to_string(),
            description: "A sample of instructions for discovery (newest first; the store \
                          offers no random ordering)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Number of instructions to return",
                        "default": 5
                    }
                }
            }),
        },
        ToolDescriptor {
            name: "get-webdna-stats".to_string(),
            description: "Store-wide statistics: instruction and category totals.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

/// Invoke one tool by name against the documentation store.
pub async fn dispatch(store: &DocStore, tool: &str, params: Value) -> Result<Value> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };

    match tool {
        "search-webdna-docs" => {
            // A missing query degrades to the empty-string search, which
            // the store answers with an empty page.
            let args: SearchParams = parse_args(params)?;
            let page = store.search(&args).await?;
            Ok(serde_json::to_value(page)?)
        }
        "get-webdna-doc" => {
            let key = doc_key(&params)?;
            match store.get_by_key(&key).await? {
                Some(detail) => Ok(serde_json::to_value(detail)?),
                None => Err(Error::NotFound(key)),
            }
        }
        "get-webdna-categories" => {
            let categories = store.list_categories().await?;
            Ok(json!({ "categories": categories }))
        }
        "get-random-webdna-docs" => {
            #[derive(Deserialize)]
            struct SampleArgs {
                #[serde(default = "default_sample_limit")]
                limit: usize,
            }
            fn default_sample_limit() -> usize {
                DEFAULT_SAMPLE_LIMIT
            }

            let args: SampleArgs = parse_args(params)?;
            let results = store.random_sample(args.limit).await?;
            Ok(json!({ "results": results }))
        }
        "get-webdna-stats" => {
            let stats = store.stats().await?;
            Ok(serde_json::to_value(stats)?)
        }
        other => Err(Error::ToolNotFound(other.to_string())),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidArguments(e.to_string()))
}

/// The lookup key for `get-webdna-doc`: accepts a string or a bare number.
fn doc_key(params: &Value) -> Result<String> {
    match params.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::MissingParameter("id".to_string())),
    }
}
