// Core data model: capabilities, provider state, session events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable tool as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments (the provider's `inputSchema`).
    pub parameters: Value,
}

/// A readable resource as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpResource {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub uri: Option<String>,
}

/// A prompt template as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpPrompt {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Everything a single provider's discovery pass returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityBundle {
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub prompts: Vec<McpPrompt>,
    pub provider_id: String,
}

/// Connection health of one provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Full snapshot of one provider session. Emitted whole on every mutation
/// so consumers never need to replay event ordering to rebuild state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub id: String,
    pub name: String,
    pub status: ProviderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<McpTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<McpResource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<McpPrompt>>,
    pub last_updated: DateTime<Utc>,
}

impl ProviderState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ProviderStatus::Stopped,
            error: None,
            tools: None,
            resources: None,
            prompts: None,
            last_updated: Utc::now(),
        }
    }
}

/// A tool in the merged catalog, carrying both its original name and the
/// gateway-wide namespaced name clients invoke it by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacedTool {
    pub name: String,
    pub namespaced_name: String,
    pub description: String,
    pub parameters: Value,
    pub provider_id: String,
    pub provider_name: String,
}

/// A resource in the merged catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacedResource {
    pub name: String,
    pub namespaced_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub provider_id: String,
    pub provider_name: String,
}

/// A prompt in the merged catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacedPrompt {
    pub name: String,
    pub namespaced_name: String,
    pub description: String,
    pub arguments: Value,
    pub provider_id: String,
    pub provider_name: String,
}

/// Event emitted by a session (and forwarded by the aggregation layer),
/// tagged with the owning provider.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChange {
        provider_id: String,
        status: ProviderStatus,
    },
    Error {
        provider_id: String,
        message: String,
    },
    /// Snapshot, not diff.
    StateChange {
        provider_id: String,
        state: ProviderState,
    },
}

/// Result of a tool invocation. Failures cross the session boundary as
/// values, never as panics or propagated errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure { message: String },
}

impl ToolOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutcome::Failure { .. })
    }

    /// JSON representation matching the wire contract: the raw result on
    /// success, `{"error": true, "message": ...}` on failure.
    pub fn to_json(&self) -> Value {
        match self {
            ToolOutcome::Success(v) => v.clone(),
            ToolOutcome::Failure { message } => serde_json::json!({
                "error": true,
                "message": message,
            }),
        }
    }
}
