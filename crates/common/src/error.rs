//! Common error types for TriRed
//!
//! This module defines all error types used by the control panel.
//! Node-level failures are never fatal: callers turn them into node status
//! or dispatch outcomes, so every variant carries a printable message.

use thiserror::Error;

/// Main error type for TriRed
#[derive(Error, Debug)]
pub enum TriRedError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport errors (connect, send, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Node answered with a non-success HTTP status
    #[error("Node returned HTTP {status} for {endpoint}")]
    NodeStatus { endpoint: String, status: u16 },

    /// Node answered but the payload could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Node id not present in the configured set
    #[error("Unknown node: {0}")]
    UnknownNode(u32),

    /// The session has been torn down
    #[error("Control session is shut down")]
    ShutDown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TriRedError {
    /// Stable short label, used as a metric label value
    pub fn label(&self) -> &'static str {
        match self {
            TriRedError::Config(_) => "config",
            TriRedError::Http(err) if err.is_timeout() => "timeout",
            TriRedError::Http(err) if err.is_connect() => "connect",
            TriRedError::Http(_) => "http",
            TriRedError::NodeStatus { .. } => "status",
            TriRedError::MalformedResponse(_) => "malformed",
            TriRedError::Timeout(_) => "timeout",
            TriRedError::UnknownNode(_) => "unknown_node",
            TriRedError::ShutDown => "shut_down",
            TriRedError::Internal(_) => "internal",
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TriRedError::Config(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        TriRedError::MalformedResponse(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        TriRedError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        TriRedError::Internal(msg.into())
    }
}

/// Result type alias for TriRed operations
pub type Result<T> = std::result::Result<T, TriRedError>;
