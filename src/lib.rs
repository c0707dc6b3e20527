//! WebDNA MCP Server - Rust Implementation
//!
//! Documentation lookup for the WebDNA scripting language's instruction
//! set. A scraper populates a relational store (a PostgREST-style REST API),
//! and two transport adapters expose search/retrieve tools:
//!
//! 1. **Store Layer** (`store`) - typed queries against the documentation
//!    store with a TTL read-through cache
//! 2. **Protocol Layer** (`protocol`) - the newline-delimited JSON wire
//!    format shared by both adapters
//! 3. **Engine** (`engine`) - the request correlator: a supervised worker
//!    subprocess, pending-id multiplexing, timeouts, restart on death
//! 4. **Adapters** (`worker`, `http`) - stdio-native front end and the
//!    HTTP-to-stdio bridge
//! 5. **Tools** (`tools`) - the five WebDNA documentation tools
//! 6. **Scraper** (`scraper`) - sequential docs-site walk feeding the store

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod protocol;
pub mod scraper;
pub mod store;
pub mod tools;
pub mod worker;

pub use error::{Error, Result};

/// Server version reported in server info and health responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name used in protocol and HTTP self-descriptions.
pub const SERVER_NAME: &str = "webdna-mcp";
