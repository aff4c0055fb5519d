//! Error types for the Helmsman domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (model providers, tools, tool servers) has its own enum;
//! the top-level [`Error`] wraps them.

use thiserror::Error;

/// The top-level error type for all Helmsman operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Tool server errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Provider(ProviderError::Cancelled) | Error::Tool(ToolError::Cancelled { .. })
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("All {attempts} provider(s) failed; last error: {last}")]
    Exhausted { attempts: usize, last: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool cancelled: {tool_name}")]
    Cancelled { tool_name: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Errors from tool server discovery, spawning and the JSON-RPC channel.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown tool server: {0}")]
    UnknownServer(String),

    #[error("Failed to spawn tool server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    #[error("Handshake with tool server '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool server '{server}' returned error {code}: {message}")]
    Remote {
        server: String,
        code: i64,
        message: String,
    },

    #[error("Request '{method}' timed out after {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Descriptor file error: {0}")]
    Descriptor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
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
    fn exhausted_names_last_failure() {
        let err = ProviderError::Exhausted {
            attempts: 3,
            last: "Network error: connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn cancellation_is_distinguished() {
        assert!(Error::Provider(ProviderError::Cancelled).is_cancelled());
        assert!(Error::Tool(ToolError::Cancelled { tool_name: "x".into() }).is_cancelled());
        assert!(!Error::Tool(ToolError::NotFound("x".into())).is_cancelled());
    }

    #[test]
    fn spawn_error_names_server() {
        let err = RegistryError::Spawn {
            server: "weather".into(),
            reason: "No such file or directory".into(),
        };
        assert!(err.to_string().contains("weather"));
    }
}
