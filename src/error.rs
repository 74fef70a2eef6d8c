//! Error types for the MCP playground server
//!
//! This module defines the error hierarchy for all operations in the server,
//! and the mapping of session errors onto HTTP status codes and JSON-RPC
//! error objects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::mcp::types::{error_codes, JsonRpcError, JsonRpcResponse};

/// Main error type for the MCP playground server
#[derive(Error, Debug)]
pub enum PlaygroundError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session lifecycle and routing errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Hosting adapter errors
    #[error("Hosting error: {0}")]
    Hosting(#[from] HostingError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Errors raised while routing a request to a session.
///
/// Every variant is converted to a JSON-RPC error body at the HTTP boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Bad Request: {message}")]
    InvalidInitializeRequest { message: String },

    #[error("Invalid or missing session ID")]
    UnknownSession,

    #[error("Invalid Request: Server already initialized")]
    AlreadyInitialized,

    #[error("Invalid Request: {message}")]
    InvalidMessage { message: String },

    #[error("Conflict: Only one SSE stream is allowed per session")]
    StreamConflict,

    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    #[error("Internal error: {message}")]
    TransportFailure { message: String },

    #[error("Internal error: protocol engine is not connected")]
    EngineUnavailable,

    #[error("Internal error: session {session_id} already exists")]
    DuplicateSession { session_id: String },

    #[error("Service unavailable: server is shutting down")]
    RegistryClosed,
}

impl SessionError {
    /// Shorthand for a rejected session-less request
    pub fn invalid_initialize(message: impl Into<String>) -> Self {
        SessionError::InvalidInitializeRequest {
            message: message.into(),
        }
    }

    /// Shorthand for a transport-level failure
    pub fn transport(message: impl Into<String>) -> Self {
        SessionError::TransportFailure {
            message: message.into(),
        }
    }

    /// HTTP status returned to the client
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::ParseError { .. }
            | SessionError::InvalidInitializeRequest { .. }
            | SessionError::UnknownSession
            | SessionError::AlreadyInitialized
            | SessionError::InvalidMessage { .. } => StatusCode::BAD_REQUEST,
            SessionError::StreamConflict => StatusCode::CONFLICT,
            SessionError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            SessionError::TransportFailure { .. }
            | SessionError::EngineUnavailable
            | SessionError::DuplicateSession { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::RegistryClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// JSON-RPC error code carried in the response body
    pub fn code(&self) -> i32 {
        match self {
            SessionError::ParseError { .. } => error_codes::PARSE_ERROR,
            SessionError::AlreadyInitialized | SessionError::InvalidMessage { .. } => {
                error_codes::INVALID_REQUEST
            }
            SessionError::TransportFailure { .. }
            | SessionError::EngineUnavailable
            | SessionError::DuplicateSession { .. } => error_codes::INTERNAL_ERROR,
            SessionError::InvalidInitializeRequest { .. }
            | SessionError::UnknownSession
            | SessionError::StreamConflict
            | SessionError::MethodNotAllowed { .. }
            | SessionError::RegistryClosed => error_codes::SERVER_ERROR,
        }
    }

    /// Build the `{jsonrpc, error, id: null}` body
    pub fn to_response_body(&self) -> JsonRpcResponse {
        JsonRpcResponse::error(
            None,
            JsonRpcError {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        )
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(self.to_response_body())).into_response()
    }
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

impl McpError {
    /// Convert to a JSON-RPC error object
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::invalid_params(self.to_string())
    }
}

/// Hosting adapter errors
#[derive(Error, Debug)]
pub enum HostingError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Invalid gateway event: {message}")]
    InvalidEvent { message: String },

    #[error("Failed to read response body: {message}")]
    Body { message: String },

    #[error("Runtime API error: {0}")]
    Runtime(#[from] reqwest::Error),

    #[error("Runtime API returned no request id")]
    MissingRequestId,
}

/// Result type alias for playground operations
pub type Result<T> = std::result::Result<T, PlaygroundError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::MissingEnvVar {
            var: "AWS_LAMBDA_RUNTIME_API".to_string(),
        };
        assert!(err.to_string().contains("AWS_LAMBDA_RUNTIME_API"));
    }

    #[test]
    fn test_error_conversion() {
        let session_err = SessionError::UnknownSession;
        let err: PlaygroundError = session_err.into();
        assert!(matches!(err, PlaygroundError::Session(_)));
    }

    #[test]
    fn test_session_error_wire_mapping() {
        let err = SessionError::invalid_initialize("No valid session ID provided");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), -32000);

        let err = SessionError::transport("boom");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), -32603);

        assert_eq!(SessionError::ParseError { message: "x".into() }.code(), -32700);
        assert_eq!(SessionError::StreamConflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            SessionError::RegistryClosed.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_body_has_null_id() {
        let body = serde_json::to_value(SessionError::UnknownSession.to_response_body()).unwrap();
        assert_eq!(body["jsonrpc"], "2.0");
        assert!(body["id"].is_null());
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Invalid or missing session ID");
    }
}
