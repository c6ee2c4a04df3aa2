// SSE transport: remote HTTP+SSE endpoint with bounded automatic reconnect
//
// Resiliency contract:
// - every remote call races a 30 s timer
// - at most 3 reconnect attempts before a hard failure
// - a connection-class tool-call failure marks the channel dead and the
//   call is retried exactly once after one reconnect cycle; any second
//   failure is returned as a structured value

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{call_with_timeout, EventSink, Transport};
use crate::errors::{McpError, McpResult};
use crate::mcp::protocol::{
    call_tool_params, prompts_from_result, resources_from_result, tools_from_result, HttpRpcClient,
};
use crate::mcp::types::{McpPrompt, McpResource, McpTool, ProviderStatus, ToolOutcome};

const MAX_RECONNECT_ATTEMPTS: u32 = 3;

struct SseState {
    client: Option<Arc<HttpRpcClient>>,
    connected: bool,
    reconnect_attempts: u32,
}

pub struct SseTransport {
    provider_id: String,
    endpoint: String,
    auth_headers: HashMap<String, String>,
    events: EventSink,
    state: Mutex<SseState>,
}

impl SseTransport {
    pub fn new(
        provider_id: &str,
        endpoint: &str,
        auth_headers: HashMap<String, String>,
        events: EventSink,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            endpoint: endpoint.to_string(),
            auth_headers,
            events,
            state: Mutex::new(SseState {
                client: None,
                connected: false,
                reconnect_attempts: 0,
            }),
        }
    }

    /// Connect with the state lock held. Any half-open channel is
    /// force-closed first, ignoring close errors.
    async fn connect_locked(&self, state: &mut SseState) -> McpResult<()> {
        if let Some(old) = state.client.take() {
            old.close().await;
        }
        state.connected = false;

        let client = Arc::new(HttpRpcClient::new(&self.endpoint, self.auth_headers.clone()));
        match call_with_timeout(client.initialize()).await {
            Ok(()) => {
                state.client = Some(client);
                state.connected = true;
                state.reconnect_attempts = 0;
                self.events.emit_status(ProviderStatus::Running);
                Ok(())
            }
            Err(e) => {
                state.client = None;
                self.events.emit_error(e.to_string());
                self.events.emit_status(ProviderStatus::Error);
                Err(e)
            }
        }
    }

    /// Reuse a healthy channel or run one reconnect cycle, giving up after
    /// [`MAX_RECONNECT_ATTEMPTS`] consecutive failures.
    async fn ensure_connected(&self, state: &mut SseState) -> McpResult<Arc<HttpRpcClient>> {
        if state.connected {
            if let Some(client) = &state.client {
                return Ok(Arc::clone(client));
            }
        }
        if state.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            return Err(McpError::Connection(
                "Max reconnection attempts reached".to_string(),
            ));
        }
        state.reconnect_attempts += 1;
        self.connect_locked(state).await?;
        state
            .client
            .clone()
            .ok_or(McpError::NotConnected)
    }

    async fn connected_client(&self) -> McpResult<Arc<HttpRpcClient>> {
        let state = self.state.lock().await;
        state.client.clone().ok_or(McpError::NotConnected)
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn connect(&self) -> McpResult<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    async fn disconnect(&self) -> McpResult<()> {
        let mut state = self.state.lock().await;
        if let Some(client) = state.client.take() {
            client.close().await;
        }
        state.connected = false;
        self.events.emit_status(ProviderStatus::Stopped);
        Ok(())
    }

    async fn discover_tools(&self) -> McpResult<Vec<McpTool>> {
        let client = self.connected_client().await?;
        match call_with_timeout(client.request("tools/list", json!({}))).await {
            Ok(result) => Ok(tools_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Tool discovery error: {}", e));
                Err(McpError::Discovery(e.to_string()))
            }
        }
    }

    async fn discover_resources(&self) -> McpResult<Vec<McpResource>> {
        let client = self.connected_client().await?;
        match call_with_timeout(client.request("resources/list", json!({}))).await {
            Ok(result) => Ok(resources_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Resource discovery error: {}", e));
                Ok(Vec::new())
            }
        }
    }

    async fn discover_prompts(&self) -> McpResult<Vec<McpPrompt>> {
        let client = self.connected_client().await?;
        match call_with_timeout(client.request("prompts/list", json!({}))).await {
            Ok(result) => Ok(prompts_from_result(&result)),
            Err(e) => {
                self.events.emit_error(format!("Prompt discovery error: {}", e));
                Ok(Vec::new())
            }
        }
    }

    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> ToolOutcome {
        // First make sure there is a channel at all.
        let client = {
            let mut state = self.state.lock().await;
            match self.ensure_connected(&mut state).await {
                Ok(client) => client,
                Err(e) => return ToolOutcome::failure(e.to_string()),
            }
        };

        let params = call_tool_params(name, args);
        let first = call_with_timeout(client.request("tools/call", params.clone())).await;
        let error = match first {
            Ok(result) => return ToolOutcome::Success(result),
            Err(e) => e,
        };

        if !error.is_connection_class() {
            // Non-connection failures are returned immediately, no retry.
            return ToolOutcome::failure(error.to_string());
        }

        tracing::warn!(
            provider = %self.provider_id,
            tool = name,
            "connection-class tool call failure, reconnecting once: {}",
            error
        );

        // Mark the channel dead (counters deliberately not reset) and run
        // one reconnect cycle, then retry exactly once.
        let client = {
            let mut state = self.state.lock().await;
            state.connected = false;
            if let Some(dead) = state.client.take() {
                dead.close().await;
            }
            match self.ensure_connected(&mut state).await {
                Ok(client) => client,
                Err(e) => return ToolOutcome::failure(e.to_string()),
            }
        };

        match call_with_timeout(client.request("tools/call", params)).await {
            Ok(result) => ToolOutcome::Success(result),
            Err(retry_error) => ToolOutcome::failure(retry_error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::SessionEvent;
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    struct StubProvider {
        calls: AtomicUsize,
        failing_calls: usize,
    }

    async fn stub_rpc(
        State(stub): State<Arc<StubProvider>>,
        Json(request): Json<Value>,
    ) -> axum::response::Response {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match request.get("method").and_then(Value::as_str) {
            Some("initialize") => {
                Json(json!({ "jsonrpc": "2.0", "id": id, "result": {} })).into_response()
            }
            Some("tools/call") => {
                let seen = stub.calls.fetch_add(1, Ordering::SeqCst);
                if seen < stub.failing_calls {
                    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "upstream reset")
                        .into_response()
                } else {
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "content": [{ "type": "text", "text": "ok" }] },
                    }))
                    .into_response()
                }
            }
            _ => axum::http::StatusCode::ACCEPTED.into_response(),
        }
    }

    /// Local MCP endpoint whose first `failing_calls` tool calls return a
    /// connection-class failure.
    async fn spawn_stub(failing_calls: usize) -> (String, Arc<StubProvider>) {
        let stub = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            failing_calls,
        });
        let app = Router::new()
            .route("/mcp", post(stub_rpc))
            .with_state(Arc::clone(&stub));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/mcp"), stub)
    }

    fn transport(endpoint: &str) -> (SseTransport, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(32);
        let transport = SseTransport::new(
            "sse-1",
            endpoint,
            HashMap::new(),
            EventSink::new("sse-1", tx),
        );
        (transport, rx)
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhausts_after_three_attempts() {
        // Nothing listens on this port, so every reconnect cycle fails.
        let (transport, _rx) = transport("http://127.0.0.1:9/mcp");

        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            let outcome = transport.call_tool("sum", &Map::new()).await;
            assert!(outcome.is_failure());
        }

        // Budget is spent: the next call fails fast with the hard error.
        let outcome = transport.call_tool("sum", &Map::new()).await;
        match outcome {
            ToolOutcome::Failure { message } => {
                assert!(
                    message.contains("Max reconnection attempts reached"),
                    "unexpected message: {message}"
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_emits_error_then_error_status() {
        let (transport, mut rx) = transport("http://127.0.0.1:9/mcp");
        assert!(transport.connect().await.is_err());

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Error { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::StatusChange { status: ProviderStatus::Error, .. }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_always_emits_stopped() {
        let (transport, mut rx) = transport("http://127.0.0.1:9/mcp");
        transport.disconnect().await.unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::StatusChange { status: ProviderStatus::Stopped, .. }
        ));
    }

    #[tokio::test]
    async fn test_connection_class_call_failure_reconnects_and_retries_once() {
        let (endpoint, stub) = spawn_stub(1).await;
        let (transport, _rx) = transport(&endpoint);
        transport.connect().await.unwrap();

        let outcome = transport.call_tool("sum", &Map::new()).await;
        assert!(
            matches!(outcome, ToolOutcome::Success(_)),
            "expected success after one retry, got {outcome:?}"
        );
        // The provider saw the original call and the single retry.
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_retry_returns_value_without_third_attempt() {
        let (endpoint, stub) = spawn_stub(usize::MAX).await;
        let (transport, _rx) = transport(&endpoint);
        transport.connect().await.unwrap();

        let outcome = transport.call_tool("sum", &Map::new()).await;
        match outcome {
            ToolOutcome::Failure { message } => {
                assert!(message.contains("500"), "unexpected message: {message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_discover_without_channel_is_not_connected() {
        let (transport, _rx) = transport("http://127.0.0.1:9/mcp");
        assert!(matches!(
            transport.discover_tools().await,
            Err(McpError::NotConnected)
        ));
    }
}
