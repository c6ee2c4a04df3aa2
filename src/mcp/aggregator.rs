// Aggregation layer: many provider sessions behind one merged catalog
//
// Registration is serialized and rejects both duplicate ids and provider
// names that collide after normalization, so namespaced-name resolution
// stays unambiguous for the lifetime of the process. Everything else is
// best-effort per provider: start, stop, and catalog merging each isolate
// one provider's failure from the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use serde_json::{Map, Value};

use crate::errors::{McpError, McpResult};
use crate::mcp::config::ProviderConfig;
use crate::mcp::names::{namespaced_name, normalize_provider_name, resolve_namespaced};
use crate::mcp::registry::ClientRegistry;
use crate::mcp::session::ClientSession;
use crate::mcp::types::{
    CapabilityBundle, NamespacedPrompt, NamespacedResource, NamespacedTool, ProviderState,
    SessionEvent, ToolOutcome,
};

pub struct AggregationLayer {
    registry: Arc<ClientRegistry>,
    providers: RwLock<HashMap<String, ProviderConfig>>,
    running: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for AggregationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationLayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry: Arc::new(ClientRegistry::with_events(events.clone())),
            providers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            events,
        }
    }

    /// One stream of session events across every provider.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a provider. Rejects duplicate ids and names that collide
    /// after normalization. If the aggregation is already running, the new
    /// provider is connected immediately.
    pub async fn add_provider(&self, config: ProviderConfig) -> McpResult<()> {
        config.validate()?;

        {
            let mut providers = self.providers.write().await;
            if providers.contains_key(&config.id) {
                return Err(McpError::AlreadyExists(config.id.clone()));
            }
            let normalized = normalize_provider_name(&config.name);
            for existing in providers.values() {
                if normalize_provider_name(&existing.name) == normalized {
                    return Err(McpError::Configuration(format!(
                        "provider name '{}' collides with '{}' after normalization ('{}')",
                        config.name, existing.name, normalized
                    )));
                }
            }
            providers.insert(config.id.clone(), config.clone());
        }

        tracing::info!(provider = %config.id, name = %config.name, "provider registered");
        if self.is_running() && config.enabled {
            self.registry.get_or_create(&config).await?;
        }
        Ok(())
    }

    /// Deregister a provider and tear down its session. Unknown ids are a
    /// no-op; returns whether the provider existed.
    pub async fn remove_provider(&self, provider_id: &str) -> bool {
        let existed = self.providers.write().await.remove(provider_id).is_some();
        self.registry.disconnect_client(provider_id).await;
        if existed {
            tracing::info!(provider = %provider_id, "provider removed");
        }
        existed
    }

    /// Connect every enabled provider concurrently. One provider failing to
    /// connect leaves it in its error state and does not stop the others.
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let configs = self.enabled_configs().await;
        tracing::info!("starting aggregation with {} provider(s)", configs.len());

        let starts = configs.iter().map(|config| async {
            match self.registry.get(&config.id).await {
                // Pre-built sessions (or restarts) get a fresh connect.
                Some(session) => {
                    if let Err(e) = session.connect().await {
                        tracing::warn!(provider = %config.id, "start failed: {}", e);
                    }
                }
                None => {
                    if let Err(e) = self.registry.get_or_create(config).await {
                        tracing::warn!(provider = %config.id, "start failed: {}", e);
                    }
                }
            }
        });
        futures::future::join_all(starts).await;
    }

    /// Disconnect every session. Always leaves the registry empty, even if
    /// individual disconnects fail.
    pub async fn stop(&self) {
        self.registry.disconnect_all().await;
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("aggregation stopped");
    }

    /// Merged tool catalog across every reachable provider, namespaced and
    /// sorted. Providers whose discovery fails outright are excluded.
    pub async fn list_tools(&self) -> Vec<NamespacedTool> {
        let configs = self.enabled_configs().await;
        let discoveries = configs.iter().map(|config| async {
            let session = self.registry.get(&config.id).await?;
            match session.discover_tools().await {
                Ok(tools) => Some((config.clone(), tools)),
                Err(e) => {
                    tracing::warn!(provider = %config.id, "excluded from tool catalog: {}", e);
                    None
                }
            }
        });

        let mut catalog = Vec::new();
        for entry in futures::future::join_all(discoveries).await.into_iter().flatten() {
            let (config, tools) = entry;
            for tool in tools {
                catalog.push(NamespacedTool {
                    namespaced_name: namespaced_name(&config.name, &tool.name),
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.parameters,
                    provider_id: config.id.clone(),
                    provider_name: config.name.clone(),
                });
            }
        }
        catalog.sort_by(|a, b| a.namespaced_name.cmp(&b.namespaced_name));
        catalog
    }

    /// Merged resource catalog; unreachable providers are skipped.
    pub async fn list_resources(&self) -> Vec<NamespacedResource> {
        let configs = self.enabled_configs().await;
        let discoveries = configs.iter().map(|config| async {
            let session = self.registry.get(&config.id).await?;
            session
                .discover_resources()
                .await
                .ok()
                .map(|resources| (config.clone(), resources))
        });

        let mut catalog = Vec::new();
        for entry in futures::future::join_all(discoveries).await.into_iter().flatten() {
            let (config, resources) = entry;
            for resource in resources {
                catalog.push(NamespacedResource {
                    namespaced_name: namespaced_name(&config.name, &resource.name),
                    name: resource.name,
                    description: resource.description,
                    uri: resource.uri,
                    provider_id: config.id.clone(),
                    provider_name: config.name.clone(),
                });
            }
        }
        catalog.sort_by(|a, b| a.namespaced_name.cmp(&b.namespaced_name));
        catalog
    }

    /// Merged prompt catalog; unreachable providers are skipped.
    pub async fn list_prompts(&self) -> Vec<NamespacedPrompt> {
        let configs = self.enabled_configs().await;
        let discoveries = configs.iter().map(|config| async {
            let session = self.registry.get(&config.id).await?;
            session
                .discover_prompts()
                .await
                .ok()
                .map(|prompts| (config.clone(), prompts))
        });

        let mut catalog = Vec::new();
        for entry in futures::future::join_all(discoveries).await.into_iter().flatten() {
            let (config, prompts) = entry;
            for prompt in prompts {
                catalog.push(NamespacedPrompt {
                    namespaced_name: namespaced_name(&config.name, &prompt.name),
                    name: prompt.name,
                    description: prompt.description,
                    arguments: prompt.arguments,
                    provider_id: config.id.clone(),
                    provider_name: config.name.clone(),
                });
            }
        }
        catalog.sort_by(|a, b| a.namespaced_name.cmp(&b.namespaced_name));
        catalog
    }

    /// One full discovery pass per provider. Failed providers are excluded
    /// rather than failing the whole pass.
    pub async fn get_capabilities(&self) -> Vec<CapabilityBundle> {
        let configs = self.enabled_configs().await;
        let discoveries = configs.iter().map(|config| async {
            let session = self.registry.get(&config.id).await?;
            match session.discover_capabilities().await {
                Ok(bundle) => Some(bundle),
                Err(e) => {
                    tracing::warn!(provider = %config.id, "excluded from capabilities: {}", e);
                    None
                }
            }
        });

        let mut bundles: Vec<CapabilityBundle> = futures::future::join_all(discoveries)
            .await
            .into_iter()
            .flatten()
            .collect();
        bundles.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        bundles
    }

    /// Route a namespaced tool call to its provider session.
    ///
    /// The provider segment is matched by longest normalized-name prefix.
    /// An unknown prefix fails with `ProviderNotFound`; a known provider
    /// with no live session fails with `SessionNotFound`. Invocation
    /// failures come back inside the [`ToolOutcome`].
    pub async fn call_tool(
        &self,
        namespaced: &str,
        args: &Map<String, Value>,
    ) -> McpResult<ToolOutcome> {
        let (provider_id, tool_name) = {
            let providers = self.providers.read().await;
            let by_normalized: HashMap<String, String> = providers
                .values()
                .map(|c| (normalize_provider_name(&c.name), c.id.clone()))
                .collect();
            let (normalized, tool) =
                resolve_namespaced(namespaced, by_normalized.keys().map(String::as_str))
                    .ok_or_else(|| McpError::ProviderNotFound(namespaced.to_string()))?;
            (by_normalized[normalized].clone(), tool.to_string())
        };

        let session = self
            .registry
            .get(&provider_id)
            .await
            .ok_or_else(|| McpError::SessionNotFound(provider_id.clone()))?;

        tracing::debug!(provider = %provider_id, tool = %tool_name, "routing tool call");
        session.call_tool(&tool_name, args).await
    }

    /// Call a tool on a specific provider by id, bypassing name resolution.
    pub async fn call_provider_tool(
        &self,
        provider_id: &str,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> McpResult<ToolOutcome> {
        if !self.providers.read().await.contains_key(provider_id) {
            return Err(McpError::ProviderNotFound(provider_id.to_string()));
        }
        let session = self
            .registry
            .get(provider_id)
            .await
            .ok_or_else(|| McpError::SessionNotFound(provider_id.to_string()))?;
        session.call_tool(tool_name, args).await
    }

    /// State snapshot for every registered provider, including ones that
    /// never got a session (reported as their initial state).
    pub async fn provider_states(&self) -> Vec<ProviderState> {
        let configs: Vec<ProviderConfig> =
            self.providers.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(configs.len());
        for config in configs {
            let state = match self.registry.get(&config.id).await {
                Some(session) => session.state().await,
                None => ProviderState::new(config.id.as_str(), config.name.as_str()),
            };
            states.push(state);
        }
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    pub async fn provider_configs(&self) -> Vec<ProviderConfig> {
        let mut configs: Vec<ProviderConfig> =
            self.providers.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    async fn enabled_configs(&self) -> Vec<ProviderConfig> {
        let mut configs: Vec<ProviderConfig> = self
            .providers
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    /// Session lookup for callers that need direct access (status pages,
    /// tests). Prefer the catalog and call methods elsewhere.
    pub async fn session(&self, provider_id: &str) -> Option<Arc<ClientSession>> {
        self.registry.get(provider_id).await
    }
}
