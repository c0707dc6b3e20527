//! Error types for the WebDNA MCP server.

use thiserror::Error;

/// Result type alias for WebDNA MCP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the WebDNA MCP server.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Store Errors =====
    #[error("Store error: {status} - {message}")]
    Store { status: u16, message: String },

    #[error("Store request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Tool Errors =====
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    // ===== Protocol / Engine Errors =====
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Correlation id already pending: {0}")]
    DuplicateCorrelation(String),

    #[error("Worker terminated unexpectedly")]
    WorkerTerminated,

    #[error("Timeout: request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Protocol engine is shut down")]
    EngineShutdown,

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Internal Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store error from HTTP response details.
    pub fn store(status: u16, message: impl Into<String>) -> Self {
        Self::Store {
            status,
            message: message.into(),
        }
    }

    /// Wire error code for this error, carried on `tool_error` messages
    /// and HTTP error bodies so callers can distinguish error classes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store { .. } | Self::Http(_) => "STORE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::MissingParameter(_) => "MISSING_PARAMETER",
            Self::InvalidArguments(_) => "INVALID_PARAMETER",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::DuplicateCorrelation(_) => "DUPLICATE_CORRELATION",
            Self::WorkerTerminated => "WORKER_TERMINATED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::EngineShutdown => "ENGINE_SHUTDOWN",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "INVALID_PARAMETER",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error came from the store layer (as opposed to a
    /// missing row, which is `NotFound` and must never be conflated).
    pub fn is_store_fault(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let store_err = Error::store(503, "connection refused");
        assert_eq!(store_err.to_string(), "Store error: 503 - connection refused");

        let missing = Error::MissingParameter("tool".to_string());
        assert_eq!(missing.to_string(), "Missing required parameter: tool");

        let timeout = Error::Timeout { seconds: 60 };
        assert_eq!(
            timeout.to_string(),
            "Timeout: request timed out after 60 seconds"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::store(500, "boom").code(), "STORE_ERROR");
        assert_eq!(Error::NotFound("42".into()).code(), "NOT_FOUND");
        assert_eq!(Error::ToolNotFound("x".into()).code(), "TOOL_NOT_FOUND");
        assert_eq!(Error::MissingParameter("tool".into()).code(), "MISSING_PARAMETER");
        assert_eq!(Error::WorkerTerminated.code(), "WORKER_TERMINATED");
        assert_eq!(Error::Timeout { seconds: 5 }.code(), "TIMEOUT");
    }

    #[test]
    fn test_store_fault_is_not_not_found() {
        assert!(Error::store(500, "boom").is_store_fault());
        assert!(!Error::NotFound("date".into()).is_store_fault());
        assert!(!Error::Timeout { seconds: 5 }.is_store_fault());
    }
}
