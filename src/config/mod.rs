//! Configuration management for the WebDNA MCP server.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command-line arguments for the WebDNA MCP server.
#[derive(Parser, Debug, Clone)]
#[command(name = "webdna-mcp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server for WebDNA instruction documentation lookup")]
pub struct Args {
    /// Transport mode: stdio or http
    #[arg(short, long, default_value = "stdio", env = "WEBDNA_MCP_TRANSPORT")]
    pub transport: Transport,

    /// HTTP port (only for http transport)
    #[arg(short, long, default_value = "3000", env = "WEBDNA_MCP_PORT")]
    pub port: u16,

    /// Enable debug logging
    #[arg(short, long, env = "WEBDNA_MCP_DEBUG")]
    pub debug: bool,

    /// Documentation store endpoint (Supabase/PostgREST base URL)
    #[arg(long, env = "WEBDNA_STORE_URL")]
    pub store_url: Option<String>,

    /// Documentation store API key
    #[arg(long, env = "WEBDNA_STORE_KEY")]
    pub store_key: Option<String>,

    /// Deployment environment reported by /health
    #[arg(long, default_value = "development", env = "WEBDNA_MCP_ENV")]
    pub environment: String,

    /// Default tool-invocation timeout in seconds (http transport)
    #[arg(long, default_value = "60", env = "WEBDNA_MCP_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Override the per-operation cache TTLs with a single value (seconds)
    #[arg(long, env = "WEBDNA_MCP_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    /// Worker command for the http transport (defaults to this binary
    /// re-invoked with `--transport stdio`)
    #[arg(long, env = "WEBDNA_MCP_WORKER_CMD")]
    pub worker_cmd: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Maintenance subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scrape the WebDNA documentation site into the store
    Scrape {
        /// Base URL of the documentation site
        #[arg(long, default_value = "https://docs.webdna.us", env = "WEBDNA_DOCS_URL")]
        base_url: String,

        /// Fixed delay between page requests, in milliseconds
        #[arg(long, default_value = "500")]
        delay_ms: u64,
    },
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport mode
    pub transport: Transport,
    /// HTTP port
    pub port: u16,
    /// Debug mode
    pub debug: bool,
    /// Store endpoint
    pub store_url: String,
    /// Store credential
    pub store_key: String,
    /// Deployment environment label
    pub environment: String,
    /// Tool-invocation timeout
    pub invoke_timeout: Duration,
    /// Uniform cache TTL override, if any
    pub cache_ttl_override: Option<Duration>,
    /// Worker command for the engine (binary + args)
    pub worker_cmd: Option<Vec<String>>,
}

impl Config {
    /// Build a config from parsed args. The store endpoint and key are
    /// required for every mode, so their absence is a configuration error
    /// rather than a panic deep inside the store client.
    pub fn from_args(args: &Args) -> crate::Result<Self> {
        let store_url = args
            .store_url
            .clone()
            .ok_or_else(|| crate::Error::Config("WEBDNA_STORE_URL is not set".to_string()))?;
        let store_key = args
            .store_key
            .clone()
            .ok_or_else(|| crate::Error::Config("WEBDNA_STORE_KEY is not set".to_string()))?;

        Ok(Self {
            transport: args.transport,
            port: args.port,
            debug: args.debug,
            store_url,
            store_key,
            environment: args.environment.clone(),
            invoke_timeout: Duration::from_secs(args.timeout_secs),
            cache_ttl_override: args.cache_ttl_secs.map(Duration::from_secs),
            worker_cmd: args
                .worker_cmd
                .as_ref()
                .map(|cmd| cmd.split_whitespace().map(String::from).collect()),
        })
    }

    /// Resolve the worker command for the engine: an explicit override, or
    /// this binary re-invoked in stdio mode.
    pub fn resolve_worker_cmd(&self) -> crate::Result<Vec<String>> {
        if let Some(cmd) = &self.worker_cmd {
            if cmd.is_empty() {
                return Err(crate::Error::Config("worker command is empty".to_string()));
            }
            return Ok(cmd.clone());
        }

        let exe = std::env::current_exe()
            .map_err(|e| crate::Error::Config(format!("cannot resolve current executable: {}", e)))?;
        let mut cmd = vec![exe.to_string_lossy().into_owned()];
        cmd.extend(["--transport".to_string(), "stdio".to_string()]);
        if self.debug {
            cmd.push("--debug".to_string());
        }
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            transport: Transport::Stdio,
            port: 3000,
            debug: false,
            store_url: Some("https://store.example.com".to_string()),
            store_key: Some("service-key".to_string()),
            environment: "test".to_string(),
            timeout_secs: 60,
            cache_ttl_secs: None,
            worker_cmd: None,
            command: None,
        }
    }

    #[test]
    fn test_transport_default() {
        assert_eq!(Transport::default(), Transport::Stdio);
    }

    #[test]
    fn test_transport_serialization() {
        assert_eq!(serde_json::to_string(&Transport::Stdio).unwrap(), "\"stdio\"");
        assert_eq!(serde_json::to_string(&Transport::Http).unwrap(), "\"http\"");
    }

    #[test]
    fn test_config_from_args() {
        let config = Config::from_args(&base_args()).unwrap();

        assert_eq!(config.transport, Transport::Stdio);
        assert_eq!(config.port, 3000);
        assert_eq!(config.store_url, "https://store.example.com");
        assert_eq!(config.invoke_timeout, Duration::from_secs(60));
        assert!(config.cache_ttl_override.is_none());
        assert!(config.worker_cmd.is_none());
    }

    #[test]
    fn test_config_requires_store_endpoint() {
        let mut args = base_args();
        args.store_url = None;
        let err = Config::from_args(&args).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let mut args = base_args();
        args.store_key = None;
        assert!(Config::from_args(&args).is_err());
    }

    #[test]
    fn test_worker_cmd_override_is_split() {
        let mut args = base_args();
        args.worker_cmd = Some("/usr/bin/worker --flag value".to_string());
        let config = Config::from_args(&args).unwrap();

        let cmd = config.resolve_worker_cmd().unwrap();
        assert_eq!(cmd, vec!["/usr/bin/worker", "--flag", "value"]);
    }

    #[test]
    fn test_default_worker_cmd_is_stdio_self() {
        let config = Config::from_args(&base_args()).unwrap();
        let cmd = config.resolve_worker_cmd().unwrap();

        assert!(cmd.len() >= 3);
        assert_eq!(&cmd[cmd.len() - 2..], ["--transport", "stdio"]);
    }
}
