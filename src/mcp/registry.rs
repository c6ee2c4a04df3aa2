// Session registry: one cached session per provider id

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use tokio::sync::broadcast;

use crate::errors::McpResult;
use crate::mcp::config::ProviderConfig;
use crate::mcp::session::ClientSession;
use crate::mcp::types::SessionEvent;

/// Keeps at most one [`ClientSession`] per provider id. The factory path
/// attempts the connect before caching, so a caller never receives a
/// session that has not at least tried to reach its provider.
pub struct ClientRegistry {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self::with_events(events)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose sessions all publish onto the given channel.
    pub fn with_events(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, provider_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(provider_id).cloned()
    }

    /// Return the cached session for this provider, or build one, attempt
    /// its connection, and cache it. A failed connect still caches the
    /// session (now in its error state) rather than leaving it dangling.
    pub async fn get_or_create(&self, config: &ProviderConfig) -> McpResult<Arc<ClientSession>> {
        if let Some(existing) = self.get(&config.id).await {
            return Ok(existing);
        }

        let session = Arc::new(ClientSession::with_events(
            config.clone(),
            self.events.clone(),
        ));
        if let Err(e) = session.connect().await {
            tracing::warn!(provider = %config.id, "initial connect failed: {}", e);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have raced us here; keep the first one in and
        // disconnect the duplicate so its provider-side session is released.
        if let Some(existing) = sessions.get(&config.id) {
            let existing = Arc::clone(existing);
            drop(sessions);
            if let Err(e) = session.disconnect().await {
                tracing::warn!(provider = %config.id, "duplicate session disconnect failed: {}", e);
            }
            return Ok(existing);
        }
        sessions.insert(config.id.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Insert a pre-built session without connecting it. Used when the
    /// caller manages the connection lifecycle itself.
    pub async fn insert(&self, session: Arc<ClientSession>) {
        self.sessions
            .write()
            .await
            .insert(session.provider_id().to_string(), session);
    }

    /// Disconnect and evict one session. Disconnect errors are logged and
    /// swallowed; the eviction happens regardless. Returns whether a
    /// session existed.
    pub async fn disconnect_client(&self, provider_id: &str) -> bool {
        let session = self.sessions.write().await.remove(provider_id);
        match session {
            Some(session) => {
                if let Err(e) = session.disconnect().await {
                    tracing::warn!(provider = %provider_id, "disconnect failed: {}", e);
                }
                true
            }
            None => false,
        }
    }

    /// Disconnect every session concurrently, then clear the cache
    /// unconditionally. Individual failures are logged, never propagated.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<ClientSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };

        let disconnects = sessions.iter().map(|session| async move {
            if let Err(e) = session.disconnect().await {
                tracing::warn!(provider = %session.provider_id(), "disconnect failed: {}", e);
            }
        });
        futures::future::join_all(disconnects).await;
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of every cached session, in no particular order.
    pub async fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().await.values().cloned().collect()
    }
}
