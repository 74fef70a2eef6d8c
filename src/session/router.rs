//! Routing policy
//!
//! Decides, from the presence of a session id and the body, whether a request
//! creates a session, goes to an existing one, or is rejected.

use std::sync::Arc;

use super::id::SessionId;
use super::registry::{SessionRegistry, SessionRequest};
use super::stateless::SharedSession;
use super::transport::TransportResponse;
use crate::config::SessionMode;
use crate::error::SessionError;
use crate::mcp::server::McpServer;

/// Transport response plus the session id to echo in the response header
#[derive(Debug)]
pub struct Routed {
    pub session_id: Option<SessionId>,
    pub response: TransportResponse,
}

/// Entry point used by the HTTP layer
#[derive(Clone)]
pub enum SessionRouter {
    Stateful(SessionRegistry),
    Stateless(SharedSession),
}

impl SessionRouter {
    /// Build the router for `mode`, binding sessions to `engine`
    pub fn new(mode: SessionMode, engine: Arc<McpServer>) -> Result<Self, SessionError> {
        Ok(match mode {
            SessionMode::Stateful => SessionRouter::Stateful(SessionRegistry::new(engine)),
            SessionMode::Stateless => SessionRouter::Stateless(SharedSession::new(engine)?),
        })
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            SessionRouter::Stateful(_) => SessionMode::Stateful,
            SessionRouter::Stateless(_) => SessionMode::Stateless,
        }
    }

    /// Route one request.
    ///
    /// | session id | request | outcome |
    /// |---|---|---|
    /// | absent | POST initialize | new session |
    /// | absent | anything else | `InvalidInitializeRequest` / `UnknownSession` |
    /// | known & active | any | forwarded to its transport |
    /// | unknown | any | `UnknownSession` |
    pub async fn route(
        &self,
        session_header: Option<&str>,
        request: SessionRequest,
    ) -> Result<Routed, SessionError> {
        let registry = match self {
            SessionRouter::Stateless(shared) => {
                return Ok(Routed {
                    session_id: None,
                    response: shared.handle(request).await?,
                })
            }
            SessionRouter::Stateful(registry) => registry,
        };

        let header = session_header.map(str::trim).filter(|h| !h.is_empty());

        match (header, request) {
            (None, SessionRequest::Post(body)) => {
                let session = registry.handle_initialize(body).await?;
                Ok(Routed {
                    session_id: Some(session.session_id),
                    response: TransportResponse::Json(session.response),
                })
            }
            (None, _) => Err(SessionError::UnknownSession),
            (Some(raw), request) => {
                let session_id = SessionId::parse(raw).ok_or(SessionError::UnknownSession)?;
                let response = registry.dispatch(&session_id, request).await?;
                Ok(Routed {
                    session_id: Some(session_id),
                    response,
                })
            }
        }
    }

    /// Sessions currently reachable; the shared session counts as one
    pub fn active_sessions(&self) -> usize {
        match self {
            SessionRouter::Stateful(registry) => registry.active_sessions(),
            SessionRouter::Stateless(shared) => usize::from(!shared.is_closed()),
        }
    }

    /// Close every live transport. Safe to call more than once.
    pub async fn shutdown(&self) -> usize {
        match self {
            SessionRouter::Stateful(registry) => registry.close_all().await,
            SessionRouter::Stateless(shared) => shared.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::ToolRegistry;
    use serde_json::{json, Value};

    fn router(mode: SessionMode) -> SessionRouter {
        SessionRouter::new(mode, Arc::new(McpServer::new(ToolRegistry::with_defaults()))).unwrap()
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

    #[tokio::test]
    async fn test_initialize_without_header_creates_session() {
        let router = router(SessionMode::Stateful);
        let routed = router
            .route(None, SessionRequest::Post(initialize_body()))
            .await
            .unwrap();
        assert!(routed.session_id.is_some());
        assert_eq!(router.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_blank_header_counts_as_missing() {
        let router = router(SessionMode::Stateful);
        let routed = router
            .route(Some("  "), SessionRequest::Post(initialize_body()))
            .await
            .unwrap();
        assert!(routed.session_id.is_some());
    }

    #[tokio::test]
    async fn test_get_and_delete_without_header_rejected() {
        let router = router(SessionMode::Stateful);
        for request in [SessionRequest::OpenStream, SessionRequest::Terminate] {
            let err = router.route(None, request).await.unwrap_err();
            assert_eq!(err, SessionError::UnknownSession);
        }
    }

    #[tokio::test]
    async fn test_malformed_header_rejected() {
        let router = router(SessionMode::Stateful);
        let err = router
            .route(Some("definitely-not-a-uuid"), SessionRequest::Post(initialize_body()))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownSession);
        assert_eq!(router.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_stateless_ignores_header() {
        let router = router(SessionMode::Stateless);
        let routed = router
            .route(Some("whatever"), SessionRequest::Post(initialize_body()))
            .await
            .unwrap();
        assert!(routed.session_id.is_none());
        assert_eq!(router.mode(), SessionMode::Stateless);
        assert_eq!(router.shutdown().await, 1);
        assert_eq!(router.active_sessions(), 0);
    }
}
