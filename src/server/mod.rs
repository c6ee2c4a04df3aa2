// Tern - HTTP gateway
// Exposes the merged tool catalog over plain HTTP endpoints

pub mod routes;

pub use routes::{validate_inputs, RouteSynchronizer, RouteTable};

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::McpError;
use crate::mcp::types::ToolOutcome;
use crate::mcp::AggregationLayer;
use crate::tunnel::TunnelService;

/// Configuration for the HTTP gateway
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:4000")
    pub bind_address: String,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4000".to_string(),
            // 1MB is generous for tool inputs while blocking oversized payloads
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Shared state behind every handler.
pub struct GatewayState {
    aggregator: Arc<AggregationLayer>,
    routes: Arc<RouteSynchronizer>,
    tunnel: Option<Arc<TunnelService>>,
}

/// The HTTP gateway in front of one aggregation layer.
pub struct GatewayServer {
    state: Arc<GatewayState>,
    config: ServerConfig,
}

impl GatewayServer {
    pub fn new(
        aggregator: Arc<AggregationLayer>,
        tunnel: Option<Arc<TunnelService>>,
        config: ServerConfig,
    ) -> Self {
        let routes = Arc::new(RouteSynchronizer::new(Arc::clone(&aggregator)));
        Self {
            state: Arc::new(GatewayState {
                aggregator,
                routes,
                tunnel,
            }),
            config,
        }
    }

    pub fn routes(&self) -> &Arc<RouteSynchronizer> {
        &self.state.routes
    }

    /// Build the axum application. Separated from `serve` so tests can
    /// drive it with `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/tools", get(handle_list_tools))
            .route("/tools/:provider/:tool", post(handle_call_tool))
            .with_state(Arc::clone(&self.state))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Publish the initial route table, start the status watcher, and
    /// serve until the listener fails.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.config.bind_address.parse()?;

        let count = self.state.routes.synchronize().await;
        self.state.routes.watch(self.state.aggregator.subscribe());
        tracing::info!("publishing {} tool route(s)", count);

        let app = self.router();
        tracing::info!("starting tern gateway on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tern",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_status(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let providers = state.aggregator.provider_states().await;
    let table = state.routes.table().await;
    let tunnel = match &state.tunnel {
        Some(service) => serde_json::to_value(service.state().await).unwrap_or(Value::Null),
        None => Value::Null,
    };
    Json(json!({
        "running": state.aggregator.is_running(),
        "providers": providers,
        "routes": table.len(),
        "tunnel": tunnel,
    }))
}

async fn handle_list_tools(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let tools = state.aggregator.list_tools().await;
    Json(json!({ "tools": tools }))
}

/// Body of `POST /tools/{provider}/{tool}`. Unknown top-level keys are a
/// validation error, not silently ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolCallRequest {
    #[serde(default)]
    inputs: Map<String, Value>,
    #[serde(default)]
    #[allow(dead_code)]
    stream: bool,
}

async fn handle_call_tool(
    State(state): State<Arc<GatewayState>>,
    Path((provider, tool)): Path<(String, String)>,
    body: Json<Value>,
) -> Response {
    let request: ToolCallRequest = match serde_json::from_value(body.0) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        }
    };

    let table = state.routes.table().await;
    let entry = match table.get(&provider, &tool) {
        Some(entry) => entry.clone(),
        None => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("tool not found: {provider}/{tool}"),
            )
        }
    };

    if let Err(reason) = validate_inputs(&entry.tool.parameters, &request.inputs) {
        return error_response(StatusCode::BAD_REQUEST, reason);
    }

    let outcome = state
        .aggregator
        .call_provider_tool(&entry.tool.provider_id, &entry.tool.name, &request.inputs)
        .await;
    match outcome {
        Ok(ToolOutcome::Success(result)) => {
            (StatusCode::OK, Json(json!({ "result": result }))).into_response()
        }
        Ok(ToolOutcome::Failure { message }) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
        // The route table can be briefly stale after a provider is removed.
        Err(e @ McpError::ProviderNotFound(_)) | Err(e @ McpError::SessionNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_binds_localhost() {
        let config = ServerConfig::default();
        assert!(config.bind_address.starts_with("127.0.0.1"));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_tool_call_request_rejects_unknown_fields() {
        let err = serde_json::from_value::<ToolCallRequest>(json!({
            "inputs": {},
            "mode": "fast",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn test_tool_call_request_defaults() {
        let request: ToolCallRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.inputs.is_empty());
        assert!(!request.stream);
    }
}
