// Crate-wide error taxonomy
//
// Connection and discovery failures degrade session state instead of
// crashing the gateway; invocation failures travel as values; configuration
// errors surface synchronously to the caller that triggered them.

use thiserror::Error;

/// Errors produced by the MCP aggregation core.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level failure (spawn failure, socket error, closed channel).
    #[error("connection error: {0}")]
    Connection(String),

    /// A bounded wait elapsed. Treated as a connection-class failure for
    /// retry purposes.
    #[error("Operation timed out")]
    Timeout,

    /// A capability listing failed. Non-fatal; degrades the cached catalog.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// A tool invocation failed on the remote side.
    #[error("invocation error: {0}")]
    Invocation(String),

    /// Provider id (or normalized name) already registered.
    #[error("provider '{0}' already exists")]
    AlreadyExists(String),

    /// No configured provider matches the namespaced name prefix.
    #[error("provider '{0}' not found")]
    ProviderNotFound(String),

    /// The provider is known but its session is missing from the registry.
    #[error("no active session for provider '{0}'")]
    SessionNotFound(String),

    /// A discovery or invocation was attempted while the session is not
    /// in the Running state.
    #[error("client not connected")]
    NotConnected,

    /// Invalid provider configuration (missing command/endpoint, bad URL).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl McpError {
    /// Whether this failure should trigger the SSE transport's
    /// reconnect-and-retry-once policy. Matches on the same message
    /// substrings the reference clients key off.
    pub fn is_connection_class(&self) -> bool {
        match self {
            McpError::Timeout => true,
            McpError::Connection(_) => true,
            McpError::Invocation(msg) | McpError::Discovery(msg) => {
                msg.contains("connection") || msg.contains("timed out")
            }
            _ => false,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_connection_class() {
        assert!(McpError::Timeout.is_connection_class());
        assert!(McpError::Connection("reset by peer".into()).is_connection_class());
    }

    #[test]
    fn test_invocation_message_matching() {
        assert!(McpError::Invocation("connection refused".into()).is_connection_class());
        assert!(McpError::Invocation("request timed out".into()).is_connection_class());
        assert!(!McpError::Invocation("invalid arguments".into()).is_connection_class());
    }

    #[test]
    fn test_configuration_errors_never_retry() {
        assert!(!McpError::AlreadyExists("a".into()).is_connection_class());
        assert!(!McpError::NotConnected.is_connection_class());
    }

    #[test]
    fn test_timeout_message_is_stable() {
        // The retry policy and HTTP error payloads both surface this string.
        assert_eq!(McpError::Timeout.to_string(), "Operation timed out");
    }
}
