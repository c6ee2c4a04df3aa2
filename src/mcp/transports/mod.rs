// Transport sessions
//
// One implementation per transport kind behind a single trait object,
// selected once at session construction. Policy differences:
//
// - stdio: no automatic reconnect; a connection failure is terminal for
//   that call. Requests carry a 60 s deadline and a child exit fails every
//   in-flight request, so nothing waits on a dead or wedged child.
// - sse: 30 s per-call timeout, bounded reconnect (3 attempts), and a
//   retry-once policy for connection-class tool-call failures.
// - streaming-http: 30 s per-call timeout; a server-side session expiry is
//   answered with one re-initialize + retry, nothing else reconnects.

mod sse;
mod stdio;
mod streaming_http;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streaming_http::StreamingHttpTransport;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::errors::{McpError, McpResult};
use crate::mcp::config::{ProviderConfig, TransportConfig};
use crate::mcp::types::{
    CapabilityBundle, McpPrompt, McpResource, McpTool, ProviderStatus, SessionEvent, ToolOutcome,
};

/// Fixed per-call timeout for remote (SSE / streaming-HTTP) transports.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed event emitter handed to a transport by its owning session.
/// Replaces the reference design's untyped event-emitter strings.
#[derive(Clone)]
pub struct EventSink {
    provider_id: String,
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(provider_id: impl Into<String>, tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            provider_id: provider_id.into(),
            tx,
        }
    }

    pub fn emit_status(&self, status: ProviderStatus) {
        // Send fails only when nobody is listening, which is fine.
        let _ = self.tx.send(SessionEvent::StatusChange {
            provider_id: self.provider_id.clone(),
            status,
        });
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let _ = self.tx.send(SessionEvent::Error {
            provider_id: self.provider_id.clone(),
            message: message.into(),
        });
    }
}

/// One connection to one provider over exactly one transport kind.
#[async_trait]
pub trait Transport: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Establish the underlying channel. Emits `Running` on success;
    /// emits an error event plus an `Error` status and re-raises on
    /// failure.
    async fn connect(&self) -> McpResult<()>;

    /// Release the channel. Idempotent; always emits `Stopped`.
    async fn disconnect(&self) -> McpResult<()>;

    /// Enumerate tools. Failure propagates (the owning session degrades
    /// its cached catalog to a placeholder).
    async fn discover_tools(&self) -> McpResult<Vec<McpTool>>;

    /// Enumerate resources. Failure yields an empty list, never an error.
    async fn discover_resources(&self) -> McpResult<Vec<McpResource>>;

    /// Enumerate prompts. Failure yields an empty list, never an error.
    async fn discover_prompts(&self) -> McpResult<Vec<McpPrompt>>;

    /// Invoke a tool. Failures cross this boundary as values.
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> ToolOutcome;

    /// Single discovery pass over all capability kinds.
    async fn discover_capabilities(&self) -> McpResult<CapabilityBundle> {
        let tools = self.discover_tools().await?;
        let resources = self.discover_resources().await?;
        let prompts = self.discover_prompts().await?;
        Ok(CapabilityBundle {
            tools,
            resources,
            prompts,
            provider_id: self.provider_id().to_string(),
        })
    }
}

/// Construct the transport for a provider. This is the only place the
/// transport kind is branched on.
pub fn build_transport(config: &ProviderConfig, events: EventSink) -> Box<dyn Transport> {
    match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            working_dir,
            env,
        } => Box::new(StdioTransport::new(
            &config.id,
            command,
            args.clone(),
            working_dir.clone(),
            env.clone(),
            events,
        )),
        TransportConfig::Sse { endpoint } => Box::new(SseTransport::new(
            &config.id,
            endpoint,
            config.auth.as_ref().map(|a| a.headers()).unwrap_or_default(),
            events,
        )),
        TransportConfig::StreamingHttp { endpoint } => Box::new(StreamingHttpTransport::new(
            &config.id,
            endpoint,
            config.auth.as_ref().map(|a| a.headers()).unwrap_or_default(),
            events,
        )),
    }
}

/// Race a remote call against [`CALL_TIMEOUT`]. The call is failed if the
/// timer wins, regardless of whether it would eventually have completed.
pub(crate) async fn call_with_timeout<T, F>(operation: F) -> McpResult<T>
where
    F: Future<Output = McpResult<T>>,
{
    match tokio::time::timeout(CALL_TIMEOUT, operation).await {
        Ok(result) => result,
        Err(_) => Err(McpError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_transport_selects_variant_once() {
        let (tx, _rx) = broadcast::channel(16);
        let config = ProviderConfig {
            id: "weather".to_string(),
            name: "Weather Tools".to_string(),
            enabled: true,
            transport: TransportConfig::Sse {
                endpoint: "http://localhost:9000/sse".to_string(),
            },
            auth: None,
        };
        let transport = build_transport(&config, EventSink::new("weather", tx));
        assert_eq!(transport.provider_id(), "weather");
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_times_out() {
        let pending = call_with_timeout::<(), _>(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let err = pending.await.unwrap_err();
        assert!(matches!(err, McpError::Timeout));
        assert_eq!(err.to_string(), "Operation timed out");
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_result_through() {
        let ok = call_with_timeout(async { Ok::<_, McpError>(7) }).await.unwrap();
        assert_eq!(ok, 7);

        let err = call_with_timeout::<(), _>(async {
            Err(McpError::Connection("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
    }

    #[test]
    fn test_event_sink_broadcasts_typed_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let sink = EventSink::new("p1", tx);
        sink.emit_status(ProviderStatus::Running);
        sink.emit_error("bad day");

        match rx.try_recv().unwrap() {
            SessionEvent::StatusChange { provider_id, status } => {
                assert_eq!(provider_id, "p1");
                assert_eq!(status, ProviderStatus::Running);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Error { .. }));
    }
}
