// Tunnel service: optional public exposure of the local gateway
//
// The connector that actually dials out is behind a trait so the service
// logic (state machine, status reporting) works with any provider and is
// testable without network access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{McpError, McpResult};

/// Connection health of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Snapshot of the tunnel, shaped for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelState {
    pub status: TunnelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelState {
    fn disconnected() -> Self {
        Self {
            status: TunnelStatus::Disconnected,
            url: None,
            error: None,
        }
    }
}

/// Dials the tunnel provider and returns the public URL.
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    async fn connect(&self, local_port: u16) -> McpResult<String>;
    async fn disconnect(&self) -> McpResult<()>;
}

/// State machine: Disconnected -> Connecting -> Connected | Error, and
/// back to Disconnected on stop. Connecting twice is rejected rather than
/// racing two dials.
pub struct TunnelService {
    connector: Box<dyn TunnelConnector>,
    state: RwLock<TunnelState>,
}

impl TunnelService {
    pub fn new(connector: Box<dyn TunnelConnector>) -> Self {
        Self {
            connector,
            state: RwLock::new(TunnelState::disconnected()),
        }
    }

    pub async fn state(&self) -> TunnelState {
        self.state.read().await.clone()
    }

    pub async fn connect(&self, local_port: u16) -> McpResult<String> {
        {
            let mut state = self.state.write().await;
            match state.status {
                TunnelStatus::Connecting | TunnelStatus::Connected => {
                    return Err(McpError::Configuration(
                        "tunnel is already connecting or connected".to_string(),
                    ));
                }
                _ => {}
            }
            state.status = TunnelStatus::Connecting;
            state.url = None;
            state.error = None;
        }

        match self.connector.connect(local_port).await {
            Ok(url) => {
                tracing::info!(%url, "tunnel established");
                let mut state = self.state.write().await;
                state.status = TunnelStatus::Connected;
                state.url = Some(url.clone());
                Ok(url)
            }
            Err(e) => {
                tracing::warn!("tunnel connect failed: {}", e);
                let mut state = self.state.write().await;
                state.status = TunnelStatus::Error;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Tear the tunnel down. Idempotent; always ends Disconnected.
    pub async fn disconnect(&self) {
        if let Err(e) = self.connector.disconnect().await {
            tracing::warn!("tunnel disconnect failed: {}", e);
        }
        *self.state.write().await = TunnelState::disconnected();
    }
}
