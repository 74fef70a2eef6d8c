//! HTTP surface
//!
//! `GET /health`, and `POST`/`GET`/`DELETE /mcp` routed through the session
//! layer. CORS allows every origin and exposes `Mcp-Session-Id`.

mod handlers;
pub mod health;

use std::sync::Arc;

use axum::http::{header, HeaderName, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::SessionError;
use crate::mcp::{McpServer, ToolRegistry};
use crate::session::SessionRouter;

/// Lowercase wire form of the session header
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

const PROTOCOL_VERSION_HEADER: HeaderName = HeaderName::from_static("mcp-protocol-version");
const LAST_EVENT_ID_HEADER: HeaderName = HeaderName::from_static("last-event-id");
const REQUESTED_WITH_HEADER: HeaderName = HeaderName::from_static("x-requested-with");

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    sessions: SessionRouter,
    config: Arc<Config>,
}

impl AppState {
    /// Build the engine with the default tools and the configured session mode
    pub fn new(config: Config) -> Result<Self, SessionError> {
        let engine = Arc::new(McpServer::new(ToolRegistry::with_defaults()));
        Self::with_engine(config, engine)
    }

    /// Build state around an existing engine
    pub fn with_engine(config: Config, engine: Arc<McpServer>) -> Result<Self, SessionError> {
        Ok(Self {
            sessions: SessionRouter::new(config.session_mode, engine)?,
            config: Arc::new(config),
        })
    }

    pub fn sessions(&self) -> &SessionRouter {
        &self.sessions
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Build the axum router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health).options(handlers::preflight))
        .route(
            "/mcp",
            get(handlers::open_stream)
                .post(handlers::post_message)
                .delete(handlers::terminate)
                .options(handlers::preflight),
        )
        .fallback(handlers::fallback)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            REQUESTED_WITH_HEADER,
            SESSION_HEADER,
            PROTOCOL_VERSION_HEADER,
            LAST_EVENT_ID_HEADER,
        ])
        .expose_headers([SESSION_HEADER])
}
