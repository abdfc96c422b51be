//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool session errors ---
    #[error("Tool session error: {0}")]
    Session(#[from] SessionError),

    // --- Generation backend errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the client side of a tool-server session.
///
/// Every variant names the server so fallback logs stay readable when
/// several candidates fail in one request.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("failed to launch tool server '{server}': {reason}")]
    Launch { server: String, reason: String },

    #[error("handshake with tool server '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("protocol error from tool server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    #[error("tool server '{server}' timed out on '{operation}' after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },
}

impl SessionError {
    /// The name of the server this error belongs to.
    pub fn server(&self) -> &str {
        match self {
            Self::Launch { server, .. }
            | Self::Handshake { server, .. }
            | Self::Protocol { server, .. }
            | Self::Timeout { server, .. } => server,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Tool round-trip failed: {0}")]
    ToolRoundTrip(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn session_error_names_server() {
        let err = SessionError::Timeout {
            server: "search".into(),
            operation: "initialize".into(),
            timeout_ms: 250,
        };
        assert_eq!(err.server(), "search");
        assert!(err.to_string().contains("250ms"));

        let wrapped: Error = err.into();
        assert!(wrapped.to_string().contains("initialize"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "wikipedia_search".into(),
            reason: "connection reset".into(),
        });
        assert!(err.to_string().contains("wikipedia_search"));
        assert!(err.to_string().contains("connection reset"));
    }
}
