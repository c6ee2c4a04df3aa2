// Client session: typed lifecycle state machine around one transport
//
// State machine: Stopped -(connect ok)-> Running, Stopped/Running
// -(connect err)-> Error, Running/Error -(disconnect)-> Stopped.
// Every mutation re-stamps `last_updated` and emits a full state snapshot,
// so consumers never depend on event ordering to reconstruct state.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, RwLock};

use crate::errors::{McpError, McpResult};
use crate::mcp::config::ProviderConfig;
use crate::mcp::names::normalize_provider_name;
use crate::mcp::transports::{build_transport, EventSink, Transport};
use crate::mcp::types::{
    CapabilityBundle, McpPrompt, McpResource, McpTool, ProviderState, ProviderStatus,
    SessionEvent, ToolOutcome,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct ClientSession {
    config: ProviderConfig,
    transport: Box<dyn Transport>,
    state: RwLock<ProviderState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ClientSession {
    /// Build a session for the configured provider, selecting the
    /// transport variant once here.
    pub fn new(config: ProviderConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::with_events(config, events)
    }

    /// Build a session that publishes onto an externally owned channel, so
    /// events from many sessions can share one stream.
    pub fn with_events(config: ProviderConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        let sink = EventSink::new(config.id.clone(), events.clone());
        let transport = build_transport(&config, sink);
        Self::from_parts(config, transport, events)
    }

    /// Build a session around an explicit transport. Used by tests and by
    /// callers that provide their own transport implementation.
    pub fn with_transport(config: ProviderConfig, transport: Box<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::from_parts(config, transport, events)
    }

    fn from_parts(
        config: ProviderConfig,
        transport: Box<dyn Transport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let state = ProviderState::new(config.id.as_str(), config.name.as_str());
        Self {
            config,
            transport,
            state: RwLock::new(state),
            events,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.config.id
    }

    pub fn provider_name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Subscribe to status/error/state events for this session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current full state snapshot.
    pub async fn state(&self) -> ProviderState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> ProviderStatus {
        self.state.read().await.status
    }

    /// Apply a mutation to the cached state, re-stamp it, and emit the new
    /// snapshot (not a diff).
    async fn update_state<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ProviderState),
    {
        let snapshot = {
            let mut state = self.state.write().await;
            mutate(&mut state);
            state.last_updated = Utc::now();
            state.clone()
        };
        let _ = self.events.send(SessionEvent::StateChange {
            provider_id: self.config.id.clone(),
            state: snapshot,
        });
    }

    pub async fn connect(&self) -> McpResult<()> {
        self.update_state(|s| {
            s.status = ProviderStatus::Starting;
            s.error = None;
        })
        .await;

        match self.transport.connect().await {
            Ok(()) => {
                self.update_state(|s| {
                    s.status = ProviderStatus::Running;
                    s.error = None;
                })
                .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.update_state(|s| {
                    s.status = ProviderStatus::Error;
                    s.error = Some(message);
                })
                .await;
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) -> McpResult<()> {
        self.transport.disconnect().await?;
        self.update_state(|s| s.status = ProviderStatus::Stopped).await;
        Ok(())
    }

    async fn require_running(&self) -> McpResult<()> {
        if self.status().await == ProviderStatus::Running {
            Ok(())
        } else {
            Err(McpError::NotConnected)
        }
    }

    /// Discover tools, caching the result. On failure the cached catalog
    /// degrades to a single synthetic placeholder tool that carries the
    /// failure context, so the provider stays visible but visibly degraded.
    pub async fn discover_tools(&self) -> McpResult<Vec<McpTool>> {
        self.require_running().await?;
        match self.transport.discover_tools().await {
            Ok(tools) => {
                self.update_state(|s| s.tools = Some(tools.clone())).await;
                Ok(tools)
            }
            Err(e) => {
                tracing::warn!(provider = %self.config.id, "tool discovery failed: {}", e);
                let placeholder = self.placeholder_tools(&format!("error discovering tools: {}", e));
                self.update_state(|s| s.tools = Some(placeholder.clone())).await;
                Ok(placeholder)
            }
        }
    }

    /// Discover resources; a failed enumeration degrades to an empty list.
    pub async fn discover_resources(&self) -> McpResult<Vec<McpResource>> {
        self.require_running().await?;
        let resources = self.transport.discover_resources().await.unwrap_or_default();
        self.update_state(|s| s.resources = Some(resources.clone())).await;
        Ok(resources)
    }

    /// Discover prompts; a failed enumeration degrades to an empty list.
    pub async fn discover_prompts(&self) -> McpResult<Vec<McpPrompt>> {
        self.require_running().await?;
        let prompts = self.transport.discover_prompts().await.unwrap_or_default();
        self.update_state(|s| s.prompts = Some(prompts.clone())).await;
        Ok(prompts)
    }

    /// One discovery pass over every capability kind.
    pub async fn discover_capabilities(&self) -> McpResult<CapabilityBundle> {
        self.require_running().await?;
        let bundle = match self.transport.discover_capabilities().await {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::warn!(
                    provider = %self.config.id,
                    "capability discovery failed: {}",
                    e
                );
                CapabilityBundle {
                    tools: self.placeholder_tools(&format!("error discovering capabilities: {}", e)),
                    resources: Vec::new(),
                    prompts: Vec::new(),
                    provider_id: self.config.id.clone(),
                }
            }
        };
        self.update_state(|s| {
            s.tools = Some(bundle.tools.clone());
            s.resources = Some(bundle.resources.clone());
            s.prompts = Some(bundle.prompts.clone());
        })
        .await;
        Ok(bundle)
    }

    /// Invoke a tool by its original (un-namespaced) name. Invocation
    /// failures come back as values, never as errors.
    pub async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> McpResult<ToolOutcome> {
        self.require_running().await?;
        Ok(self.transport.call_tool(name, args).await)
    }

    /// The degraded stand-in published when tool discovery fails.
    fn placeholder_tools(&self, context: &str) -> Vec<McpTool> {
        vec![McpTool {
            name: format!("{}_tool", normalize_provider_name(&self.config.name)),
            description: format!("Generic tool for {} ({})", self.config.name, context),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The prompt to send to the server",
                    },
                    "options": {
                        "type": "object",
                        "description": "Additional options to control behavior",
                    },
                },
                "required": ["prompt"],
            }),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn provider_config(id: &str, name: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            transport: crate::mcp::config::TransportConfig::Stdio {
                command: "true".to_string(),
                args: vec![],
                working_dir: None,
                env: HashMap::new(),
            },
            auth: None,
        }
    }

    /// Scriptable transport double.
    struct FakeTransport {
        provider_id: String,
        fail_connect: bool,
        fail_discovery: AtomicBool,
    }

    impl FakeTransport {
        fn new(provider_id: &str) -> Self {
            Self {
                provider_id: provider_id.to_string(),
                fail_connect: false,
                fail_discovery: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn provider_id(&self) -> &str {
            &self.provider_id
        }
        async fn connect(&self) -> McpResult<()> {
            if self.fail_connect {
                Err(McpError::Connection("refused".to_string()))
            } else {
                Ok(())
            }
        }
        async fn disconnect(&self) -> McpResult<()> {
            Ok(())
        }
        async fn discover_tools(&self) -> McpResult<Vec<McpTool>> {
            if self.fail_discovery.load(Ordering::SeqCst) {
                return Err(McpError::Discovery("listing crashed".to_string()));
            }
            Ok(vec![McpTool {
                name: "sum".to_string(),
                description: "Add numbers".to_string(),
                parameters: json!({ "type": "object" }),
            }])
        }
        async fn discover_resources(&self) -> McpResult<Vec<McpResource>> {
            Ok(vec![])
        }
        async fn discover_prompts(&self) -> McpResult<Vec<McpPrompt>> {
            Ok(vec![])
        }
        async fn call_tool(&self, _name: &str, _args: &Map<String, Value>) -> ToolOutcome {
            ToolOutcome::Success(json!({ "ok": true }))
        }
    }

    #[tokio::test]
    async fn test_state_machine_happy_path() {
        let session = ClientSession::with_transport(
            provider_config("p1", "Provider One"),
            Box::new(FakeTransport::new("p1")),
        );
        assert_eq!(session.status().await, ProviderStatus::Stopped);

        session.connect().await.unwrap();
        assert_eq!(session.status().await, ProviderStatus::Running);

        session.disconnect().await.unwrap();
        assert_eq!(session.status().await, ProviderStatus::Stopped);
    }

    #[tokio::test]
    async fn test_connect_failure_enters_error_state() {
        let mut transport = FakeTransport::new("p1");
        transport.fail_connect = true;
        let session =
            ClientSession::with_transport(provider_config("p1", "P1"), Box::new(transport));

        assert!(session.connect().await.is_err());
        let state = session.state().await;
        assert_eq!(state.status, ProviderStatus::Error);
        assert!(state.error.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_discovery_requires_running() {
        let session = ClientSession::with_transport(
            provider_config("p1", "P1"),
            Box::new(FakeTransport::new("p1")),
        );
        assert!(matches!(
            session.discover_tools().await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            session.call_tool("sum", &Map::new()).await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_discovery_failure_degrades_to_placeholder() {
        let transport = FakeTransport::new("p1");
        transport.fail_discovery.store(true, Ordering::SeqCst);
        let session = ClientSession::with_transport(
            provider_config("p1", "Weather Tools"),
            Box::new(transport),
        );
        session.connect().await.unwrap();

        let tools = session.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "weather_tools_tool");
        assert!(tools[0].description.contains("error discovering tools"));

        // The cached snapshot reflects the degraded view, not a stale success.
        let state = session.state().await;
        assert_eq!(state.tools.unwrap()[0].name, "weather_tools_tool");
    }

    #[tokio::test]
    async fn test_state_events_carry_full_snapshots() {
        let session = ClientSession::with_transport(
            provider_config("p1", "P1"),
            Box::new(FakeTransport::new("p1")),
        );
        let mut rx = session.subscribe();
        session.connect().await.unwrap();

        // Starting then Running, each a complete snapshot.
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StateChange { state, .. } = event {
                statuses.push(state.status);
            }
        }
        assert_eq!(statuses, vec![ProviderStatus::Starting, ProviderStatus::Running]);
    }
}
