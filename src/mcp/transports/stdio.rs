// Subprocess transport: spawn the provider and speak JSON-RPC on its pipes

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{EventSink, Transport};
use crate::errors::{McpError, McpResult};
use crate::mcp::protocol::{
    call_tool_params, prompts_from_result, resources_from_result, tools_from_result,
    StdioRpcClient,
};
use crate::mcp::types::{McpPrompt, McpResource, McpTool, ProviderStatus, ToolOutcome};

/// Transport over a spawned local process. No automatic reconnect: if the
/// child dies, the next connect attempt respawns it; a failure mid-call is
/// terminal for that call. A child exit fails every in-flight request, and
/// requests to a wedged child are bounded by the stdio request deadline, so
/// connect and discovery always settle.
pub struct StdioTransport {
    provider_id: String,
    command: String,
    args: Vec<String>,
    working_dir: Option<String>,
    env: HashMap<String, String>,
    events: EventSink,
    client: RwLock<Option<Arc<StdioRpcClient>>>,
}

impl StdioTransport {
    pub fn new(
        provider_id: &str,
        command: &str,
        args: Vec<String>,
        working_dir: Option<String>,
        env: HashMap<String, String>,
        events: EventSink,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            command: command.to_string(),
            args,
            working_dir,
            env,
            events,
            client: RwLock::new(None),
        }
    }

    async fn client(&self) -> McpResult<Arc<StdioRpcClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(McpError::NotConnected)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn connect(&self) -> McpResult<()> {
        tracing::debug!(
            provider = %self.provider_id,
            "launching MCP server: {} {}",
            self.command,
            self.args.join(" ")
        );

        let result = async {
            let client = StdioRpcClient::spawn(
                &self.command,
                &self.args,
                self.working_dir.as_deref(),
                &self.env,
            )
            .await?;
            client.initialize().await?;
            Ok::<_, McpError>(client)
        }
        .await;

        match result {
            Ok(client) => {
                *self.client.write().await = Some(Arc::new(client));
                self.events.emit_status(ProviderStatus::Running);
                Ok(())
            }
            Err(e) => {
                self.events.emit_error(e.to_string());
                self.events.emit_status(ProviderStatus::Error);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> McpResult<()> {
        if let Some(client) = self.client.write().await.take() {
            client.close().await;
        }
        // Idempotent: disconnecting an already-stopped session still
        // reports Stopped.
        self.events.emit_status(ProviderStatus::Stopped);
        Ok(())
    }

    async fn discover_tools(&self) -> McpResult<Vec<McpTool>> {
        let client = self.client().await?;
        match client.request("tools/list", json!({})).await {
            Ok(result) => Ok(tools_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Tool discovery error: {}", e));
                Err(McpError::Discovery(e.to_string()))
            }
        }
    }

    async fn discover_resources(&self) -> McpResult<Vec<McpResource>> {
        let client = self.client().await?;
        match client.request("resources/list", json!({})).await {
            Ok(result) => Ok(resources_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Resource discovery error: {}", e));
                Ok(Vec::new())
            }
        }
    }

    async fn discover_prompts(&self) -> McpResult<Vec<McpPrompt>> {
        let client = self.client().await?;
        match client.request("prompts/list", json!({})).await {
            Ok(result) => Ok(prompts_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Prompt discovery error: {}", e));
                Ok(Vec::new())
            }
        }
    }

    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> ToolOutcome {
        let client = match self.client().await {
            Ok(client) => client,
            Err(_) => return ToolOutcome::failure("Client not connected"),
        };
        match client.request("tools/call", call_tool_params(name, args)).await {
            Ok(result) => ToolOutcome::Success(result),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::SessionEvent;
    use tokio::sync::broadcast;

    fn transport_with_events() -> (StdioTransport, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let transport = StdioTransport::new(
            "p1",
            "definitely-not-a-real-binary-for-tern-tests",
            vec![],
            None,
            HashMap::new(),
            EventSink::new("p1", tx),
        );
        (transport, rx)
    }

    #[tokio::test]
    async fn test_connect_failure_emits_error_then_error_status() {
        let (transport, mut rx) = transport_with_events();
        let result = transport.connect().await;
        assert!(result.is_err());

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Error { .. }));
        match rx.try_recv().unwrap() {
            SessionEvent::StatusChange { status, .. } => {
                assert_eq!(status, ProviderStatus::Error)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_emits_stopped() {
        let (transport, mut rx) = transport_with_events();
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                SessionEvent::StatusChange { status, .. } => {
                    assert_eq!(status, ProviderStatus::Stopped)
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_call_tool_without_connection_returns_value() {
        let (transport, _rx) = transport_with_events();
        let outcome = transport.call_tool("anything", &Map::new()).await;
        assert_eq!(outcome, ToolOutcome::failure("Client not connected"));
    }

    #[tokio::test]
    async fn test_discover_tools_without_connection_fails() {
        let (transport, _rx) = transport_with_events();
        assert!(matches!(
            transport.discover_tools().await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_settles_when_child_exits_immediately() {
        // `true` exits without ever answering the handshake; the closed
        // stdout must fail the in-flight initialize instead of hanging it.
        let (tx, _rx) = broadcast::channel(16);
        let transport = StdioTransport::new(
            "p1",
            "true",
            vec![],
            None,
            HashMap::new(),
            EventSink::new("p1", tx),
        );

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), transport.connect())
            .await
            .expect("connect did not settle after child exit");
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_settles_when_child_never_answers() {
        // The child stays alive but never speaks JSON-RPC; the request
        // deadline bounds the handshake.
        let (tx, _rx) = broadcast::channel(16);
        let transport = StdioTransport::new(
            "p1",
            "sleep",
            vec!["30".to_string()],
            None,
            HashMap::new(),
            EventSink::new("p1", tx),
        );

        let result = transport.connect().await;
        assert!(matches!(result, Err(McpError::Timeout)));
    }
}
