// MCP capability aggregation
//
// Layering, bottom to top:
//   protocol   - JSON-RPC plumbing over child pipes or HTTP
//   transports - one policy-bearing implementation per transport kind
//   session    - lifecycle state machine around one transport
//   registry   - one cached session per provider id
//   aggregator - merged, namespaced catalog and call routing

pub mod aggregator;
pub mod config;
pub mod names;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transports;
pub mod types;

pub use aggregator::AggregationLayer;
pub use config::{AuthConfig, ProviderConfig, TransportConfig};
pub use names::{namespaced_name, normalize_provider_name, resolve_namespaced};
pub use registry::ClientRegistry;
pub use session::ClientSession;
pub use transports::{Transport, CALL_TIMEOUT};
pub use types::{
    CapabilityBundle, McpPrompt, McpResource, McpTool, NamespacedPrompt, NamespacedResource,
    NamespacedTool, ProviderState, ProviderStatus, SessionEvent, ToolOutcome,
};
