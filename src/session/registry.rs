//! Session registry
//!
//! Owns the `session id → session` map for the stateful mode. Sessions are
//! created only by [`SessionRegistry::handle_initialize`], looked up by
//! [`SessionRegistry::dispatch`] and removed when their transport reports
//! closure. The map is never exposed to the HTTP layer or the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::id::SessionId;
use super::state::SessionState;
use super::transport::{SessionLifecycle, StreamableTransport, TransportResponse};
use crate::error::SessionError;
use crate::mcp::server::McpServer;
use crate::mcp::types::{is_initialize_request, JsonRpcNotification};

/// A request aimed at an existing session
#[derive(Debug, Clone)]
pub enum SessionRequest {
    /// POST: client-to-server message(s)
    Post(Value),
    /// GET: open the server-push stream
    OpenStream,
    /// DELETE: explicit termination
    Terminate,
}

impl SessionRequest {
    /// HTTP method name, for logs and errors
    pub fn method(&self) -> &'static str {
        match self {
            SessionRequest::Post(_) => "POST",
            SessionRequest::OpenStream => "GET",
            SessionRequest::Terminate => "DELETE",
        }
    }
}

/// Result of a successful initialize handshake
#[derive(Debug)]
pub struct InitializedSession {
    pub session_id: SessionId,
    /// JSON-RPC response to the initialize request
    pub response: Value,
}

struct Session {
    transport: Arc<StreamableTransport>,
    state: SessionState,
}

struct RegistryInner {
    engine: Arc<McpServer>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    open: AtomicBool,
}

impl RegistryInner {
    fn promote(&self, session_id: &SessionId) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        match session.state.transition(SessionState::Active) {
            Ok(state) => {
                session.state = state;
                tracing::info!(session_id = %session_id, "session initialized");
            }
            Err(e) => tracing::warn!(session_id = %session_id, error = %e, "ignoring promotion"),
        }
    }

    /// Remove a session; a second call for the same id is a no-op
    fn remove(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        match removed {
            Some(session) => {
                match session.state.transition(SessionState::Closed) {
                    Ok(_) => tracing::info!(session_id = %session_id, "session closed"),
                    Err(e) => tracing::debug!(session_id = %session_id, error = %e, "discarded session"),
                }
                true
            }
            None => false,
        }
    }
}

/// Hook handed to each transport; holds the registry weakly so a transport
/// never keeps the registry alive.
struct RegistryHooks {
    inner: Weak<RegistryInner>,
}

impl SessionLifecycle for RegistryHooks {
    fn on_initialized(&self, session_id: &SessionId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.promote(session_id);
        }
    }

    fn on_closed(&self, session_id: &SessionId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(session_id);
        }
    }
}

/// Session Registry & Transport Router for stateful mode
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Open a registry whose sessions bind to `engine`
    pub fn new(engine: Arc<McpServer>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                engine,
                sessions: Mutex::new(HashMap::new()),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Create a session from a session-less initialize request.
    ///
    /// The session becomes visible to [`dispatch`](Self::dispatch) only once
    /// the engine has answered the handshake successfully.
    pub async fn handle_initialize(&self, body: Value) -> Result<InitializedSession, SessionError> {
        if !is_initialize_request(&body) {
            return Err(SessionError::invalid_initialize("No valid session ID provided"));
        }
        if !self.is_open() {
            return Err(SessionError::RegistryClosed);
        }

        let session_id = SessionId::generate();
        let hooks = Arc::new(RegistryHooks {
            inner: Arc::downgrade(&self.inner),
        });
        let transport = Arc::new(StreamableTransport::stateful(session_id, hooks));

        {
            let mut sessions = self.inner.sessions.lock();
            // close_all flips `open` before draining under this lock
            if !self.is_open() {
                return Err(SessionError::RegistryClosed);
            }
            if sessions.contains_key(&session_id) {
                return Err(SessionError::DuplicateSession {
                    session_id: session_id.to_string(),
                });
            }
            sessions.insert(
                session_id,
                Session {
                    transport: Arc::clone(&transport),
                    state: SessionState::Uninitialized,
                },
            );
        }

        let outcome = self.complete_handshake(&session_id, &transport, body).await;
        if outcome.is_err() {
            // Never promoted, so the transport's close hook will not fire.
            self.inner.sessions.lock().remove(&session_id);
            if !self.is_open() {
                return Err(SessionError::RegistryClosed);
            }
        }
        outcome
    }

    async fn complete_handshake(
        &self,
        session_id: &SessionId,
        transport: &Arc<StreamableTransport>,
        body: Value,
    ) -> Result<InitializedSession, SessionError> {
        self.inner.engine.connect(transport)?;

        let response = match transport.handle_post(body).await? {
            TransportResponse::Json(value) => value,
            other => {
                return Err(SessionError::transport(format!(
                    "unexpected initialize reply: {:?}",
                    other
                )))
            }
        };

        let state = self
            .inner
            .sessions
            .lock()
            .get(session_id)
            .map(|s| s.state);

        match state {
            Some(SessionState::Active) => Ok(InitializedSession {
                session_id: *session_id,
                response,
            }),
            // Drained by a shutdown while the handshake was in flight
            None => Err(SessionError::RegistryClosed),
            Some(_) => Err(SessionError::invalid_initialize(handshake_error(&response))),
        }
    }

    /// Route a request to an existing, active session
    pub async fn dispatch(
        &self,
        session_id: &SessionId,
        request: SessionRequest,
    ) -> Result<TransportResponse, SessionError> {
        let transport = self.lookup(session_id)?;
        tracing::debug!(session_id = %session_id, method = request.method(), "dispatch");

        match request {
            SessionRequest::Post(body) => transport.handle_post(body).await,
            SessionRequest::OpenStream => transport.open_stream().map(TransportResponse::Stream),
            SessionRequest::Terminate => {
                transport.shutdown().await;
                // The close hook already removed it unless the registry was dropped
                self.inner.remove(session_id);
                tracing::info!(session_id = %session_id, "session terminated by client");
                Ok(TransportResponse::Terminated)
            }
        }
    }

    /// Transport close callback. Idempotent.
    pub fn on_transport_closed(&self, session_id: &SessionId) -> bool {
        self.inner.remove(session_id)
    }

    /// Push a notification to one session's open stream
    pub fn notify(
        &self,
        session_id: &SessionId,
        notification: &JsonRpcNotification,
    ) -> Result<bool, SessionError> {
        self.lookup(session_id)?.send(notification)
    }

    /// Push a notification to every active session; returns how many took it
    pub fn broadcast(&self, notification: &JsonRpcNotification) -> usize {
        self.active_transports()
            .into_iter()
            .filter(|t| matches!(t.send(notification), Ok(true)))
            .count()
    }

    /// Close every live transport and refuse new sessions
    pub async fn close_all(&self) -> usize {
        self.inner.open.store(false, Ordering::SeqCst);

        let drained: Vec<_> = self
            .inner
            .sessions
            .lock()
            .drain()
            .map(|(_, session)| session.transport)
            .collect();

        let count = drained.len();
        for transport in drained {
            transport.shutdown().await;
        }

        if count > 0 {
            tracing::info!(count, "closed all sessions");
        }
        count
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Number of sessions visible to dispatch
    pub fn active_sessions(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.state.is_active())
            .count()
    }

    /// Whether `session_id` names an active session
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.lookup(session_id).is_ok()
    }

    fn lookup(&self, session_id: &SessionId) -> Result<Arc<StreamableTransport>, SessionError> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .filter(|s| s.state.is_active())
            .map(|s| Arc::clone(&s.transport))
            .ok_or(SessionError::UnknownSession)
    }

    fn active_transports(&self) -> Vec<Arc<StreamableTransport>> {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.state.is_active())
            .map(|s| Arc::clone(&s.transport))
            .collect()
    }
}

fn handshake_error(response: &Value) -> String {
    response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("initialize handshake failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::ToolRegistry;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::HashSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(McpServer::new(ToolRegistry::with_defaults())))
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

    fn ping() -> SessionRequest {
        SessionRequest::Post(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
    }

    #[tokio::test]
    async fn test_initialize_creates_active_session() {
        let registry = registry();
        let session = registry.handle_initialize(initialize_body()).await.unwrap();

        assert!(registry.contains(&session.session_id));
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(session.response["result"]["serverInfo"]["name"], "mcp-playground");
    }

    #[tokio::test]
    async fn test_non_initialize_creates_nothing() {
        let registry = registry();
        let bodies = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"hello": "world"}),
            json!([]),
            json!(null),
        ];

        for body in bodies {
            let err = registry.handle_initialize(body).await.unwrap_err();
            assert!(matches!(err, SessionError::InvalidInitializeRequest { .. }));
            assert_eq!(err.code(), -32000);
        }
        assert_eq!(registry.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = registry();
        let mut ids = HashSet::new();
        for _ in 0..50 {
            let session = registry.handle_initialize(initialize_body()).await.unwrap();
            assert!(ids.insert(session.session_id));
        }
        assert_eq!(registry.active_sessions(), 50);
    }

    #[tokio::test]
    async fn test_dispatch_to_known_and_unknown_sessions() {
        let registry = registry();
        let session = registry.handle_initialize(initialize_body()).await.unwrap();

        let resp = registry.dispatch(&session.session_id, ping()).await.unwrap();
        assert!(matches!(resp, TransportResponse::Json(_)));

        let other = SessionId::generate();
        let err = registry.dispatch(&other, ping()).await.unwrap_err();
        assert_eq!(err, SessionError::UnknownSession);
    }

    #[tokio::test]
    async fn test_terminated_session_is_unknown() {
        let registry = registry();
        let id = registry.handle_initialize(initialize_body()).await.unwrap().session_id;

        let resp = registry.dispatch(&id, SessionRequest::Terminate).await.unwrap();
        assert!(matches!(resp, TransportResponse::Terminated));
        assert!(!registry.contains(&id));

        let err = registry.dispatch(&id, ping()).await.unwrap_err();
        assert_eq!(err, SessionError::UnknownSession);
        let err = registry.dispatch(&id, SessionRequest::Terminate).await.unwrap_err();
        assert_eq!(err, SessionError::UnknownSession);
    }

    #[tokio::test]
    async fn test_on_transport_closed_is_idempotent() {
        let registry = registry();
        let id = registry.handle_initialize(initialize_body()).await.unwrap().session_id;

        assert!(registry.on_transport_closed(&id));
        assert!(!registry.on_transport_closed(&id));
        assert_eq!(registry.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_reinitialize_existing_session_rejected() {
        let registry = registry();
        let id = registry.handle_initialize(initialize_body()).await.unwrap().session_id;

        let err = registry
            .dispatch(&id, SessionRequest::Post(initialize_body()))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::AlreadyInitialized);
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn test_notify_reaches_only_target_session() {
        let registry = registry();
        let a = registry.handle_initialize(initialize_body()).await.unwrap().session_id;
        let b = registry.handle_initialize(initialize_body()).await.unwrap().session_id;

        let mut stream_a = match registry.dispatch(&a, SessionRequest::OpenStream).await.unwrap() {
            TransportResponse::Stream(s) => s,
            other => panic!("expected stream, got {:?}", other),
        };
        let _stream_b = match registry.dispatch(&b, SessionRequest::OpenStream).await.unwrap() {
            TransportResponse::Stream(s) => s,
            other => panic!("expected stream, got {:?}", other),
        };

        let note = JsonRpcNotification::new("notifications/message", Some(json!({"to": "a"})));
        assert!(registry.notify(&a, &note).unwrap());

        let event = stream_a.next().await.unwrap();
        assert!(event.data.contains("\"to\":\"a\""));
        assert_eq!(registry.broadcast(&note), 2);
    }

    #[tokio::test]
    async fn test_stream_disconnect_reclaims_session() {
        let registry = registry();
        let id = registry.handle_initialize(initialize_body()).await.unwrap().session_id;

        let stream = registry.dispatch(&id, SessionRequest::OpenStream).await.unwrap();
        drop(stream);

        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn test_close_all_drains_and_refuses_new_sessions() {
        let registry = registry();
        for _ in 0..3 {
            registry.handle_initialize(initialize_body()).await.unwrap();
        }

        assert_eq!(registry.close_all().await, 3);
        assert_eq!(registry.active_sessions(), 0);
        assert!(!registry.is_open());

        let err = registry.handle_initialize(initialize_body()).await.unwrap_err();
        assert_eq!(err, SessionError::RegistryClosed);
        assert_eq!(registry.close_all().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_close_all_racing_initialize_leaves_nothing_behind() {
        for _ in 0..50 {
            let registry = registry();
            let handshakes: Vec<_> = (0..16)
                .map(|_| {
                    let registry = registry.clone();
                    tokio::spawn(async move { registry.handle_initialize(initialize_body()).await })
                })
                .collect();

            tokio::task::yield_now().await;
            registry.close_all().await;

            for handshake in handshakes {
                match handshake.await.unwrap() {
                    Ok(session) => assert!(!registry.contains(&session.session_id)),
                    Err(e) => assert_eq!(e, SessionError::RegistryClosed),
                }
            }
            assert_eq!(registry.active_sessions(), 0);
            assert!(registry.inner.sessions.lock().is_empty());
        }
    }
}
