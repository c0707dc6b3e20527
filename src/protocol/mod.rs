//! Wire protocol types for the newline-delimited JSON transport.
//!
//! One JSON object per line, UTF-8, discriminated by a `type` tag. Both
//! adapters speak this format: the engine writes request-shaped messages
//! to the worker's stdin and the worker answers response-shaped messages
//! on its stdout, matched by correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A single protocol message. Closed set: adding a message kind is a
/// compile-time-checked change at every dispatch site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Engine → worker, sent on spawn and on explicit re-init. No reply
    /// is awaited; `ready` is advisory.
    Init,
    /// Worker → engine, advisory readiness signal.
    Ready,
    /// Engine → worker, request for the tool catalog.
    ListTools {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Worker → engine, the tool catalog.
    Tools {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        tools: Vec<ToolDescriptor>,
    },
    /// Engine → worker, invoke one named tool.
    InvokeTool {
        id: String,
        tool: String,
        #[serde(default)]
        params: Value,
    },
    /// Worker → engine, successful tool invocation.
    ToolResult { id: String, result: Value },
    /// Worker → engine, failed tool invocation.
    ToolError { id: String, error: WireError },
    /// Worker → engine heartbeat; no reply expected.
    Ping { id: String },
}

impl WireMessage {
    /// The correlation id carried by this message, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Init | Self::Ready => None,
            Self::ListTools { id } | Self::Tools { id, .. } => id.as_deref(),
            Self::InvokeTool { id, .. }
            | Self::ToolResult { id, .. }
            | Self::ToolError { id, .. }
            | Self::Ping { id } => Some(id),
        }
    }

    /// Set the correlation id on a request-shaped message. Fire-and-forget
    /// and response-shaped kinds are left untouched.
    pub fn assign_id(&mut self, new_id: String) {
        match self {
            Self::ListTools { id } => *id = Some(new_id),
            Self::InvokeTool { id, .. } => *id = new_id,
            _ => {}
        }
    }

    /// Whether this message answers a pending request.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Tools { .. } | Self::ToolResult { .. } | Self::ToolError { .. }
        )
    }

    /// Synthetic failure delivered when a request's timer fires first.
    pub fn timeout_error(id: String, seconds: u64) -> Self {
        Self::ToolError {
            id,
            error: WireError {
                message: format!("request timed out after {} seconds", seconds),
                code: Some(codes::TIMEOUT.to_string()),
            },
        }
    }

    /// Synthetic failure delivered to every pending request when the
    /// worker process exits.
    pub fn terminated_error(id: String) -> Self {
        Self::ToolError {
            id,
            error: WireError {
                message: "worker terminated unexpectedly".to_string(),
                code: Some(codes::WORKER_TERMINATED.to_string()),
            },
        }
    }
}

/// Error payload on `tool_error` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&Error> for WireError {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            code: Some(e.code().to_string()),
        }
    }
}

/// Tool descriptor exposed through `tools` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Wire error codes carried on `tool_error` messages and HTTP bodies.
pub mod codes {
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const WORKER_TERMINATED: &str = "WORKER_TERMINATED";
    pub const MISSING_PARAMETER: &str = "MISSING_PARAMETER";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const STORE_ERROR: &str = "STORE_ERROR";
}
