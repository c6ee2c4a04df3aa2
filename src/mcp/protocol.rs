// MCP protocol client boundary
//
// JSON-RPC 2.0 plumbing for the two underlying channel shapes: a spawned
// child process speaking line-delimited JSON-RPC on its pipes, and an HTTP
// endpoint speaking JSON-RPC over POST (with optional SSE-framed response
// bodies and Mcp-Session-Id session management). Transports wrap these with
// their timeout / reconnect / retry policy; no policy lives here.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::errors::{McpError, McpResult};
use crate::mcp::types::{McpPrompt, McpResource, McpTool};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "tern";

/// Upper bound on a stdio request. The child is local, but a wedged or
/// crashed process must not hang callers waiting for a response that will
/// never arrive.
const STDIO_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the JSON-RPC `initialize` request parameters.
fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
    })
}

/// Extract the `result` payload from a JSON-RPC response, converting a
/// remote `error` object into an `Invocation` error.
fn unwrap_rpc_result(response: Value) -> McpResult<Value> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(McpError::Invocation(message));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Stdio channel
// ---------------------------------------------------------------------------

/// JSON-RPC client over a spawned child process.
pub struct StdioRpcClient {
    child: Arc<Mutex<Child>>,
    pending: Arc<RwLock<HashMap<String, oneshot::Sender<Value>>>>,
    closed: Arc<AtomicBool>,
    tx: mpsc::Sender<String>,
}

impl StdioRpcClient {
    /// Spawn the provider process and attach reader/writer tasks to its
    /// pipes. Does not perform the protocol handshake; call
    /// [`StdioRpcClient::initialize`] next.
    pub async fn spawn(
        command: &str,
        args: &[String],
        working_dir: Option<&str>,
        env: &HashMap<String, String>,
    ) -> McpResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::Connection(format!("failed to spawn process '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("failed to open child stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("failed to open child stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Connection("failed to open child stderr".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let pending: Arc<RwLock<HashMap<String, oneshot::Sender<Value>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Stdout reader: match JSON-RPC responses to pending requests by id.
        // When the pipe closes (the child exited) every in-flight request is
        // failed by dropping its sender; nothing may wait on a dead child.
        let pending_reader = Arc::clone(&pending);
        let closed_reader = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&line) else {
                            continue;
                        };
                        let Some(id) = value.get("id") else {
                            continue; // notification
                        };
                        let id = match id {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            _ => continue,
                        };
                        let mut pending = pending_reader.write().await;
                        if let Some(sender) = pending.remove(&id) {
                            let _ = sender.send(value);
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("MCP stdout closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("error reading MCP stdout: {}", e);
                        break;
                    }
                }
            }
            closed_reader.store(true, Ordering::SeqCst);
            pending_reader.write().await.clear();
        });

        // Stderr reader: surface server diagnostics in our log stream.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "tern::provider_stderr", "{}", line.trim_end());
            }
        });

        // Stdin writer: serialize outbound requests, one per line.
        let mut stdin = stdin;
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    tracing::warn!("failed to write to MCP stdin; writer task exiting");
                    break;
                }
            }
        });

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            pending,
            closed,
            tx,
        })
    }

    /// Perform the MCP handshake: `initialize` followed by the
    /// `notifications/initialized` notification.
    pub async fn initialize(&self) -> McpResult<()> {
        self.request("initialize", initialize_params()).await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    /// Send a JSON-RPC request and await its response.
    pub async fn request(&self, method: &str, params: Value) -> McpResult<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id.clone(),
            "method": method,
            "params": params,
        });

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.write().await.insert(id.clone(), resp_tx);

        // Checked after the insert so a close racing this request either
        // drops our sender or is caught here; there is no window where the
        // request outlives the child.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.write().await.remove(&id);
            return Err(McpError::Connection(
                "MCP server process closed its stdout".to_string(),
            ));
        }

        let msg = serde_json::to_string(&request)
            .map_err(|e| McpError::Connection(format!("failed to serialize request: {}", e)))?;
        if self.tx.send(msg).await.is_err() {
            self.pending.write().await.remove(&id);
            return Err(McpError::Connection(
                "MCP stdin writer task is gone".to_string(),
            ));
        }

        match tokio::time::timeout(STDIO_REQUEST_TIMEOUT, resp_rx).await {
            Ok(Ok(response)) => unwrap_rpc_result(response),
            Ok(Err(_)) => Err(McpError::Connection(
                "MCP response channel closed".to_string(),
            )),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(McpError::Timeout)
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let msg = serde_json::to_string(&notification)
            .map_err(|e| McpError::Connection(format!("failed to serialize notification: {}", e)))?;
        self.tx
            .send(msg)
            .await
            .map_err(|_| McpError::Connection("MCP stdin writer task is gone".to_string()))
    }

    /// Kill the child process and drop all pending requests.
    pub async fn close(&self) {
        self.pending.write().await.clear();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!("error killing MCP child process: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP channel (SSE and streamable HTTP endpoints)
// ---------------------------------------------------------------------------

/// JSON-RPC client over HTTP POST, per the MCP streamable-HTTP transport.
/// Servers may answer with plain JSON or with an SSE-framed body; both are
/// handled. A `Mcp-Session-Id` returned by `initialize` is echoed on every
/// subsequent request and released with a DELETE on close.
pub struct HttpRpcClient {
    client: reqwest::Client,
    endpoint: String,
    auth_headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
}

impl HttpRpcClient {
    pub fn new(endpoint: &str, auth_headers: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            auth_headers,
            session_id: RwLock::new(None),
        }
    }

    /// Initialize a session with the server and record its session id,
    /// if the server issued one.
    pub async fn initialize(&self) -> McpResult<()> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": "init_1",
            "method": "initialize",
            "params": initialize_params(),
        });

        let response = self
            .post(&request, None)
            .await
            .map_err(|e| McpError::Connection(format!("failed to connect to MCP server: {}", e)))?;

        let session_id = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Connection(format!(
                "MCP initialization failed ({}): {}",
                status, body
            )));
        }

        let body = self.read_rpc_body(response).await?;
        unwrap_rpc_result(body)?;
        *self.session_id.write().await = session_id;

        // Per spec the client confirms the handshake; servers that do not
        // accept the notification are tolerated.
        let initialized = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {},
        });
        let session = self.session_id.read().await.clone();
        if let Err(e) = self.post(&initialized, session.as_deref()).await {
            tracing::debug!("initialized notification rejected: {}", e);
        }
        Ok(())
    }

    /// Send a JSON-RPC request and return its `result` payload.
    pub async fn request(&self, method: &str, params: Value) -> McpResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": format!("{}_{}", method, uuid::Uuid::new_v4()),
            "method": method,
            "params": params,
        });

        let session = self.session_id.read().await.clone();
        let response = self
            .post(&request, session.as_deref())
            .await
            .map_err(|e| McpError::Connection(format!("MCP request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && session.is_some() {
            // Session expired; the owning transport decides whether to
            // re-initialize and retry.
            *self.session_id.write().await = None;
            return Err(McpError::Connection(
                "session expired, connection must be re-initialized".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Connection(format!(
                "MCP server returned error ({}): {}",
                status, body
            )));
        }

        let body = self.read_rpc_body(response).await?;
        unwrap_rpc_result(body)
    }

    /// Release the server-side session, if any. Failures are logged only;
    /// teardown must never block on the remote side.
    pub async fn close(&self) {
        let session = self.session_id.write().await.take();
        if let Some(session_id) = session {
            let mut request = self
                .client
                .delete(&self.endpoint)
                .header("Mcp-Session-Id", &session_id)
                .timeout(std::time::Duration::from_secs(10));
            for (key, value) in &self.auth_headers {
                request = request.header(key, value);
            }
            if let Err(e) = request.send().await {
                tracing::debug!("failed to terminate MCP session: {}", e);
            }
        }
    }

    async fn post(
        &self,
        payload: &Value,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .header("Accept", "application/json, text/event-stream");
        if let Some(id) = session_id {
            request = request.header("Mcp-Session-Id", id);
        }
        for (key, value) in &self.auth_headers {
            request = request.header(key, value);
        }
        request.send().await
    }

    /// Read a response body that is either plain JSON or an SSE stream
    /// carrying the JSON-RPC response in a `data:` field.
    async fn read_rpc_body(&self, response: reqwest::Response) -> McpResult<Value> {
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| McpError::Connection(format!("failed to read MCP response: {}", e)))?;

        if is_sse {
            parse_sse_payload(&body)
        } else {
            serde_json::from_str(&body).map_err(|e| {
                McpError::Connection(format!(
                    "failed to parse MCP response: {} (body: {})",
                    e,
                    &body[..body.len().min(200)]
                ))
            })
        }
    }
}

/// Extract the JSON-RPC response from an SSE-framed body: the first `data:`
/// line that parses as a JSON-RPC result or error.
fn parse_sse_payload(body: &str) -> McpResult<Value> {
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
            if value.get("result").is_some() || value.get("error").is_some() {
                return Ok(value);
            }
        }
    }
    Err(McpError::Connection(
        "SSE response carried no JSON-RPC payload".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Capability record parsing
// ---------------------------------------------------------------------------

/// Parse a `tools/list` result. Tools without a description are given a
/// generated placeholder so the catalog never publishes empty descriptions.
pub fn tools_from_result(result: &Value) -> Vec<McpTool> {
    result
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name")?.as_str()?.to_string();
                    let description = tool
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("Tool for {}", name));
                    let parameters = tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object" }));
                    Some(McpTool {
                        name,
                        description,
                        parameters,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a `resources/list` result.
pub fn resources_from_result(result: &Value) -> Vec<McpResource> {
    result
        .get("resources")
        .and_then(|r| r.as_array())
        .map(|resources| {
            resources
                .iter()
                .filter_map(|resource| {
                    let name = resource.get("name")?.as_str()?.to_string();
                    let description = resource
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("Resource {}", name));
                    let uri = resource
                        .get("uri")
                        .and_then(|u| u.as_str())
                        .map(|s| s.to_string());
                    Some(McpResource {
                        name,
                        description,
                        uri,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a `prompts/list` result.
pub fn prompts_from_result(result: &Value) -> Vec<McpPrompt> {
    result
        .get("prompts")
        .and_then(|p| p.as_array())
        .map(|prompts| {
            prompts
                .iter()
                .filter_map(|prompt| {
                    let name = prompt.get("name")?.as_str()?.to_string();
                    let description = prompt
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("Prompt {}", name));
                    let arguments = prompt.get("arguments").cloned().unwrap_or(Value::Null);
                    Some(McpPrompt {
                        name,
                        description,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build `tools/call` parameters.
pub fn call_tool_params(name: &str, args: &Map<String, Value>) -> Value {
    json!({
        "name": name,
        "arguments": args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_from_result_fills_missing_description() {
        let result = json!({
            "tools": [
                { "name": "forecast", "inputSchema": { "type": "object" } },
                { "name": "sum", "description": "Add two numbers" },
            ]
        });
        let tools = tools_from_result(&result);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].description, "Tool for forecast");
        assert_eq!(tools[1].description, "Add two numbers");
    }

    #[test]
    fn test_tools_from_result_skips_nameless_entries() {
        let result = json!({ "tools": [ { "description": "no name" } ] });
        assert!(tools_from_result(&result).is_empty());
    }

    #[test]
    fn test_resources_and_prompts_placeholders() {
        let resources = resources_from_result(&json!({
            "resources": [ { "name": "logs", "uri": "file:///tmp/log" } ]
        }));
        assert_eq!(resources[0].description, "Resource logs");

        let prompts = prompts_from_result(&json!({
            "prompts": [ { "name": "summarize" } ]
        }));
        assert_eq!(prompts[0].description, "Prompt summarize");
    }

    #[test]
    fn test_unwrap_rpc_result_error_object() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": { "code": -32601, "message": "Method not found" },
        });
        let err = unwrap_rpc_result(response).unwrap_err();
        assert!(matches!(err, McpError::Invocation(ref m) if m == "Method not found"));
    }

    #[test]
    fn test_parse_sse_payload() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"tools\":[]}}\n\n";
        let value = parse_sse_payload(body).unwrap();
        assert!(value.get("result").is_some());
    }

    #[test]
    fn test_parse_sse_payload_ignores_keepalives() {
        let body = ": keepalive\n\ndata: not json\n\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"2\",\"error\":{\"message\":\"boom\"}}\n";
        let value = parse_sse_payload(body).unwrap();
        assert_eq!(value["error"]["message"], "boom");
    }
}
