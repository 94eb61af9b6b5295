// crates/ncp-server/src/error.rs
// Error taxonomy for the federation engine, mapped to JSON-RPC codes at the boundary

use serde::Serialize;
use thiserror::Error;

/// Details attached to a -32001 confirmation-required error.
///
/// The upstream client is expected to re-issue the same `run` call with a
/// `_userResponse` of "yes", "always" or "no".
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationDetails {
    pub tool: String,
    pub description: String,
    pub parameters_preview: String,
    pub pattern: String,
    pub confidence: f32,
}

/// Main error type for the NCP library
#[derive(Error, Debug)]
pub enum NcpError {
    #[error("downstream '{mcp}' failed to start: {reason}")]
    StartupFailed { mcp: String, reason: String },

    #[error("downstream '{mcp}' did not answer initialize within {timeout_secs}s")]
    StartupTimeout { mcp: String, timeout_secs: u64 },

    #[error("protocol error from '{mcp}': {reason}")]
    Protocol { mcp: String, reason: String },

    #[error("session to '{mcp}' lost: {reason}")]
    SessionLost { mcp: String, reason: String },

    #[error("call to '{mcp}' timed out after {timeout_secs}s")]
    CallTimeout { mcp: String, timeout_secs: u64 },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool not found: {tool}")]
    ToolNotFound {
        tool: String,
        suggestions: Vec<String>,
    },

    #[error("confirmation required before running '{}'", .0.tool)]
    ConfirmationRequired(Box<ConfirmationDetails>),

    #[error("operation cancelled")]
    OperationCancelled,

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Error relayed from a downstream JSON-RPC error response.
    #[error("downstream error {code}: {message}")]
    Downstream { code: i64, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result using NcpError
pub type Result<T> = std::result::Result<T, NcpError>;

impl NcpError {
    /// JSON-RPC error code for this error at the upstream boundary.
    pub fn rpc_code(&self) -> i64 {
        match self {
            NcpError::InvalidArguments(_) => crate::rpc::INVALID_PARAMS,
            NcpError::ToolNotFound { .. } => crate::rpc::METHOD_NOT_FOUND,
            NcpError::ConfirmationRequired(_) => crate::rpc::CONFIRMATION_REQUIRED,
            NcpError::OperationCancelled => crate::rpc::OPERATION_CANCELLED,
            NcpError::Downstream { code, .. } => *code,
            _ => crate::rpc::INTERNAL_ERROR,
        }
    }

    /// Structured `data` payload for the JSON-RPC error, where one exists.
    pub fn rpc_data(&self) -> Option<serde_json::Value> {
        match self {
            NcpError::ConfirmationRequired(details) => serde_json::to_value(details).ok(),
            NcpError::ToolNotFound { suggestions, .. } if !suggestions.is_empty() => {
                Some(serde_json::json!({ "suggestions": suggestions }))
            }
            _ => None,
        }
    }

    /// Summarized message for the upstream boundary. Raw downstream errors are
    /// kept in logs keyed by tracking id, not relayed verbatim.
    pub fn boundary_message(&self) -> String {
        match self {
            NcpError::CallTimeout { mcp, timeout_secs } => {
                format!("timeout: '{mcp}' did not respond within {timeout_secs}s")
            }
            NcpError::ToolNotFound { tool, suggestions } if !suggestions.is_empty() => {
                format!("tool not found: {tool}. Did you mean: {}?", suggestions.join(", "))
            }
            other => other.to_string(),
        }
    }
}

impl From<String> for NcpError {
    fn from(s: String) -> Self {
        NcpError::Other(s)
    }
}
