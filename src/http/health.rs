//! Health check endpoint

use axum::extract::State;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::AppState;
use crate::mcp::server::{SERVER_NAME, SERVER_VERSION};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub server: ServerReport,
    pub mcp: McpReport,
}

#[derive(Debug, Serialize)]
pub struct ServerReport {
    pub name: &'static str,
    pub version: &'static str,
    pub environment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpReport {
    pub session_type: &'static str,
    pub active_sessions: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        server: ServerReport {
            name: SERVER_NAME,
            version: SERVER_VERSION,
            environment: state.config().environment.clone(),
        },
        mcp: McpReport {
            session_type: state.sessions().mode().as_str(),
            active_sessions: state.sessions().active_sessions(),
        },
    })
}
