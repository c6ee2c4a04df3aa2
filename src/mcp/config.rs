// Provider configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{McpError, McpResult};

/// One configured MCP provider. The transport kind is fixed at creation;
/// a provider that changes transport is a different provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique id within the registry.
    pub id: String,

    /// Human-readable name. Its normalized form prefixes every tool this
    /// provider contributes to the catalog.
    pub name: String,

    /// Disabled providers stay in configuration but are never connected.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Optional authentication applied to HTTP-based transports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

fn default_true() -> bool {
    true
}

/// Transport descriptor, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Spawn a local process and speak line-delimited JSON-RPC on its pipes.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote HTTP+SSE endpoint.
    Sse { endpoint: String },
    /// Remote streamable-HTTP endpoint.
    StreamingHttp { endpoint: String },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Sse { .. } => "sse",
            TransportConfig::StreamingHttp { .. } => "streaming-http",
        }
    }
}

/// Authentication descriptor for remote transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Scheme name, e.g. "bearer".
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Credential material keyed by field name (e.g. "token").
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl AuthConfig {
    /// HTTP headers implied by this descriptor. Only bearer tokens are
    /// understood; other schemes are passed through as-is when the
    /// credential key already looks like a header name.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if self.auth_type.eq_ignore_ascii_case("bearer") {
            if let Some(token) = self.credentials.get("token") {
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
        } else {
            for (key, value) in &self.credentials {
                headers.insert(key.clone(), value.clone());
            }
        }
        headers
    }
}

impl ProviderConfig {
    /// Validate the configuration before any session is constructed.
    pub fn validate(&self) -> McpResult<()> {
        if self.id.trim().is_empty() {
            return Err(McpError::Configuration(
                "provider id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(McpError::Configuration(format!(
                "provider '{}': name must not be empty",
                self.id
            )));
        }
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(McpError::Configuration(format!(
                        "provider '{}': stdio transport requires a command",
                        self.id
                    )));
                }
            }
            TransportConfig::Sse { endpoint } | TransportConfig::StreamingHttp { endpoint } => {
                if endpoint.parse::<reqwest::Url>().is_err() {
                    return Err(McpError::Configuration(format!(
                        "provider '{}': invalid endpoint URL '{}'",
                        self.id, endpoint
                    )));
                }
            }
        }
        Ok(())
    }
}
