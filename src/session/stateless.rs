//! Stateless mode
//!
//! One implicit, always-on session backed by a single shared transport. No
//! session id is issued or required, so clients are not isolated from each
//! other. Selected only through explicit configuration.

use std::sync::Arc;

use super::registry::SessionRequest;
use super::transport::{StreamableTransport, TransportResponse};
use crate::error::SessionError;
use crate::mcp::server::McpServer;
use crate::mcp::types::JsonRpcNotification;

/// The single shared session
#[derive(Clone)]
pub struct SharedSession {
    transport: Arc<StreamableTransport>,
}

impl SharedSession {
    /// Create the shared transport and bind the engine to it up front
    pub fn new(engine: Arc<McpServer>) -> Result<Self, SessionError> {
        let transport = Arc::new(StreamableTransport::stateless());
        engine.connect(&transport)?;

        tracing::info!("stateless mode: all clients share one transport");

        Ok(Self { transport })
    }

    /// Route a request; DELETE has no session to terminate
    pub async fn handle(&self, request: SessionRequest) -> Result<TransportResponse, SessionError> {
        match request {
            SessionRequest::Post(body) => self.transport.handle_post(body).await,
            SessionRequest::OpenStream => self.transport.open_stream().map(TransportResponse::Stream),
            SessionRequest::Terminate => Err(SessionError::MethodNotAllowed {
                method: "DELETE".to_string(),
            }),
        }
    }

    /// Push a notification to whoever holds the shared stream
    pub fn notify(&self, notification: &JsonRpcNotification) -> Result<bool, SessionError> {
        self.transport.send(notification)
    }

    /// Close the shared transport; returns 1 the first time
    pub async fn close(&self) -> usize {
        usize::from(self.transport.shutdown().await)
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}
