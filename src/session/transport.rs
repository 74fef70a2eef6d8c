//! Streamable HTTP transport
//!
//! One transport serves one session. It feeds POSTed messages to the bound
//! protocol engine in arrival order, owns the session's server-push stream,
//! and reports lifecycle events (initialized, closed) to its owner through a
//! [`SessionLifecycle`] hook injected at construction.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::id::SessionId;
use crate::error::SessionError;
use crate::mcp::server::McpServer;
use crate::mcp::types::{IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcResponse};

/// Buffered server-push events per stream before new ones are dropped
const OUTBOUND_BUFFER: usize = 64;

/// Lifecycle notifications a transport sends to whoever owns it.
///
/// Implementations must not call back into the transport.
pub trait SessionLifecycle: Send + Sync {
    /// The initialize handshake completed successfully
    fn on_initialized(&self, session_id: &SessionId);

    /// The transport closed; called at most once per transport
    fn on_closed(&self, session_id: &SessionId);
}

/// What the HTTP layer should send back
#[derive(Debug)]
pub enum TransportResponse {
    /// `200` with a JSON-RPC response (or batch of responses)
    Json(Value),
    /// `202`, the POST carried only notifications or client responses
    Accepted,
    /// Server-push stream for a GET
    Stream(EventStream),
    /// `200`, the session was terminated
    Terminated,
}

/// One server-pushed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Per-transport, monotonically increasing
    pub id: u64,
    /// Serialized JSON-RPC message
    pub data: String,
}

struct Outbound {
    stream_id: u64,
    tx: mpsc::Sender<ServerEvent>,
}

/// Per-session streamable HTTP transport
pub struct StreamableTransport {
    session_id: Option<SessionId>,
    engine: OnceLock<Arc<McpServer>>,
    lifecycle: Option<Arc<dyn SessionLifecycle>>,
    /// Serializes delivery so the engine sees messages in arrival order
    inbound: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<Outbound>>,
    next_stream_id: AtomicU64,
    next_event_id: AtomicU64,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl StreamableTransport {
    /// Transport for a registry-managed session
    pub fn stateful(session_id: SessionId, lifecycle: Arc<dyn SessionLifecycle>) -> Self {
        Self::build(Some(session_id), Some(lifecycle))
    }

    /// Transport with no session id, shared by every client
    pub fn stateless() -> Self {
        Self::build(None, None)
    }

    fn build(session_id: Option<SessionId>, lifecycle: Option<Arc<dyn SessionLifecycle>>) -> Self {
        Self {
            session_id,
            engine: OnceLock::new(),
            lifecycle,
            inbound: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
            next_stream_id: AtomicU64::new(0),
            next_event_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a server-push stream is currently attached
    pub fn has_stream(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .map_or(false, |o| !o.tx.is_closed())
    }

    pub(crate) fn bind_engine(&self, engine: Arc<McpServer>) -> Result<(), SessionError> {
        self.engine
            .set(engine)
            .map_err(|_| SessionError::transport("transport is already connected to an engine"))
    }

    fn engine(&self) -> Result<Arc<McpServer>, SessionError> {
        self.engine
            .get()
            .cloned()
            .ok_or(SessionError::EngineUnavailable)
    }

    /// Deliver a POSTed body (single message or batch) to the engine
    pub async fn handle_post(&self, body: Value) -> Result<TransportResponse, SessionError> {
        let engine = self.engine()?;

        let (batch, messages) = match body {
            Value::Array(items) if items.is_empty() => {
                return Err(SessionError::InvalidMessage {
                    message: "empty batch".to_string(),
                })
            }
            Value::Array(items) => (true, items),
            other => (false, vec![other]),
        };

        let _ordered = self.inbound.lock().await;
        if self.is_closed() {
            return Err(SessionError::UnknownSession);
        }

        let mut responses = Vec::new();
        for raw in messages {
            let message: IncomingMessage = match serde_json::from_value(raw) {
                Ok(message) => message,
                Err(e) => {
                    responses.push(JsonRpcResponse::error(
                        None,
                        JsonRpcError::invalid_request(format!("Invalid JSON-RPC message: {}", e)),
                    ));
                    continue;
                }
            };

            let is_initialize = message.is_initialize();
            if is_initialize && self.session_id.is_some() && self.is_initialized() {
                return Err(SessionError::AlreadyInitialized);
            }

            let reply = AssertUnwindSafe(engine.handle_message(message))
                .catch_unwind()
                .await
                .map_err(|_| SessionError::transport("message handler panicked"))?;

            if let Some(response) = reply {
                if is_initialize && !response.is_error() {
                    self.mark_initialized();
                }
                responses.push(response);
            }
        }

        if responses.is_empty() {
            return Ok(TransportResponse::Accepted);
        }

        let body = if batch {
            serde_json::to_value(&responses)
        } else {
            serde_json::to_value(&responses[0])
        }
        .map_err(|e| SessionError::transport(e.to_string()))?;

        Ok(TransportResponse::Json(body))
    }

    fn mark_initialized(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(id), Some(lifecycle)) = (&self.session_id, &self.lifecycle) {
            lifecycle.on_initialized(id);
        }
    }

    /// Attach the server-push stream. Only one may be open at a time.
    pub fn open_stream(self: &Arc<Self>) -> Result<EventStream, SessionError> {
        let mut slot = self.outbound.lock();
        if self.is_closed() {
            return Err(SessionError::UnknownSession);
        }
        if slot.as_ref().map_or(false, |o| !o.tx.is_closed()) {
            return Err(SessionError::StreamConflict);
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        *slot = Some(Outbound { stream_id, tx });

        tracing::debug!(session_id = ?self.session_id.map(|id| id.to_string()), stream_id, "stream opened");

        Ok(EventStream {
            rx,
            _guard: StreamGuard {
                transport: Arc::downgrade(self),
                stream_id,
                close_session: self.session_id.is_some(),
            },
        })
    }

    /// Push a notification onto the open stream.
    ///
    /// Returns `false` when no stream is attached or its buffer is full.
    pub fn send(&self, notification: &JsonRpcNotification) -> Result<bool, SessionError> {
        let data = serde_json::to_string(notification)
            .map_err(|e| SessionError::transport(e.to_string()))?;

        let slot = self.outbound.lock();
        let outbound = match slot.as_ref() {
            Some(outbound) => outbound,
            None => return Ok(false),
        };

        let event = ServerEvent {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            data,
        };

        match outbound.tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(method = %notification.method, "stream buffer full, dropping message");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Ok(false),
        }
    }

    /// Close the transport, end its stream and notify the owner.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.outbound.lock().take();

        if let Some(id) = &self.session_id {
            tracing::debug!(session_id = %id, "transport closed");
            if let Some(lifecycle) = &self.lifecycle {
                lifecycle.on_closed(id);
            }
        }
        true
    }

    /// Wait for in-flight messages to finish, then close
    pub async fn shutdown(&self) -> bool {
        let _drain = self.inbound.lock().await;
        self.close()
    }

    fn release_stream(&self, stream_id: u64) {
        let mut slot = self.outbound.lock();
        if slot.as_ref().map_or(false, |o| o.stream_id == stream_id) {
            slot.take();
        }
    }
}

impl fmt::Debug for StreamableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableTransport")
            .field("session_id", &self.session_id)
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Server-push stream handed to the HTTP layer.
///
/// Dropping it (client disconnect) frees the transport's stream slot and, for
/// a stateful session, closes the session.
pub struct EventStream {
    rx: mpsc::Receiver<ServerEvent>,
    _guard: StreamGuard,
}

impl Stream for EventStream {
    type Item = ServerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("stream_id", &self._guard.stream_id)
            .finish()
    }
}

struct StreamGuard {
    transport: Weak<StreamableTransport>,
    stream_id: u64,
    close_session: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        transport.release_stream(self.stream_id);
        if self.close_session && transport.close() {
            tracing::info!(
                session_id = ?transport.session_id().map(|id| id.to_string()),
                "stream disconnected, session closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::ToolRegistry;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHooks {
        initialized: Mutex<Vec<SessionId>>,
        closed: Mutex<Vec<SessionId>>,
    }

    impl SessionLifecycle for RecordingHooks {
        fn on_initialized(&self, session_id: &SessionId) {
            self.initialized.lock().push(*session_id);
        }

        fn on_closed(&self, session_id: &SessionId) {
            self.closed.lock().push(*session_id);
        }
    }

    fn initialize_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0.0.1"}
            }
        })
    }

    fn connected(hooks: Arc<RecordingHooks>) -> (SessionId, Arc<StreamableTransport>) {
        let id = SessionId::generate();
        let transport = Arc::new(StreamableTransport::stateful(id, hooks));
        let engine = Arc::new(McpServer::new(ToolRegistry::with_defaults()));
        engine.connect(&transport).unwrap();
        (id, transport)
    }

    #[tokio::test]
    async fn test_unbound_transport_reports_engine_unavailable() {
        let transport = StreamableTransport::stateless();
        let result = transport.handle_post(initialize_body()).await;
        assert_eq!(result.unwrap_err(), SessionError::EngineUnavailable);
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (_, transport) = connected(Arc::default());
        let engine = Arc::new(McpServer::new(ToolRegistry::new()));
        assert!(matches!(
            engine.connect(&transport),
            Err(SessionError::TransportFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_fires_hook_once() {
        let hooks = Arc::new(RecordingHooks::default());
        let (id, transport) = connected(hooks.clone());

        let resp = transport.handle_post(initialize_body()).await.unwrap();
        assert!(matches!(resp, TransportResponse::Json(_)));
        assert!(transport.is_initialized());
        assert_eq!(*hooks.initialized.lock(), vec![id]);

        let again = transport.handle_post(initialize_body()).await;
        assert_eq!(again.unwrap_err(), SessionError::AlreadyInitialized);
        assert_eq!(hooks.initialized.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_only_post_is_accepted() {
        let (_, transport) = connected(Arc::default());
        let resp = transport
            .handle_post(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap();
        assert!(matches!(resp, TransportResponse::Accepted));
    }

    #[tokio::test]
    async fn test_batch_returns_array() {
        let (_, transport) = connected(Arc::default());
        let resp = transport
            .handle_post(json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
            ]))
            .await
            .unwrap();

        match resp {
            TransportResponse::Json(Value::Array(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1]["result"]["tools"][0]["name"], "hello");
            }
            other => panic!("expected batch response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (_, transport) = connected(Arc::default());
        let result = transport.handle_post(json!([])).await;
        assert!(matches!(result, Err(SessionError::InvalidMessage { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_notifies_once() {
        let hooks = Arc::new(RecordingHooks::default());
        let (id, transport) = connected(hooks.clone());

        assert!(transport.close());
        assert!(!transport.close());
        assert_eq!(*hooks.closed.lock(), vec![id]);

        let result = transport.handle_post(initialize_body()).await;
        assert_eq!(result.unwrap_err(), SessionError::UnknownSession);
    }

    #[tokio::test]
    async fn test_stream_receives_pushed_messages() {
        let (_, transport) = connected(Arc::default());
        let mut stream = transport.open_stream().unwrap();

        let note = JsonRpcNotification::new("notifications/message", Some(json!({"level": "info"})));
        assert!(transport.send(&note).unwrap());
        assert!(transport.send(&note).unwrap());

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert!(second.id > first.id);
        let value: Value = serde_json::from_str(&first.data).unwrap();
        assert_eq!(value["method"], "notifications/message");
    }

    #[tokio::test]
    async fn test_second_stream_conflicts() {
        let (_, transport) = connected(Arc::default());
        let _stream = transport.open_stream().unwrap();
        assert_eq!(
            transport.open_stream().unwrap_err(),
            SessionError::StreamConflict
        );
    }

    #[tokio::test]
    async fn test_send_without_stream() {
        let (_, transport) = connected(Arc::default());
        let note = JsonRpcNotification::new("notifications/message", None);
        assert!(!transport.send(&note).unwrap());
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_stateful_session() {
        let hooks = Arc::new(RecordingHooks::default());
        let (id, transport) = connected(hooks.clone());

        let stream = transport.open_stream().unwrap();
        drop(stream);

        assert!(transport.is_closed());
        assert_eq!(*hooks.closed.lock(), vec![id]);
    }

    #[tokio::test]
    async fn test_dropping_stream_keeps_stateless_transport_open() {
        let transport = Arc::new(StreamableTransport::stateless());
        let stream = transport.open_stream().unwrap();
        drop(stream);

        assert!(!transport.is_closed());
        assert!(!transport.has_stream());
        assert!(transport.open_stream().is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (_, transport) = connected(Arc::default());
        let mut stream = transport.open_stream().unwrap();
        transport.close();

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end");
        assert!(next.is_none());
    }
}
