//! MCP Server implementation
//!
//! The protocol engine: turns inbound JSON-RPC messages into responses and tool
//! invocations. It owns no session state; a transport binds to it through
//! [`McpServer::connect`].

use std::sync::Arc;

use serde_json::Value;

use crate::error::SessionError;
use crate::mcp::tools::ToolRegistry;
use crate::mcp::types::*;
use crate::session::transport::StreamableTransport;

/// MCP Server info
pub const SERVER_NAME: &str = "mcp-playground";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol engine
pub struct McpServer {
    /// Server identity reported during initialize
    info: ServerInfo,

    /// Tool registry
    tools: ToolRegistry,
}

impl McpServer {
    /// Create a new MCP server over a tool registry
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            tools,
        }
    }

    /// Server identity
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Bind this engine to a transport.
    ///
    /// A transport accepts exactly one engine; binding twice is an error.
    pub fn connect(self: &Arc<Self>, transport: &StreamableTransport) -> Result<(), SessionError> {
        transport.bind_engine(Arc::clone(self))
    }

    /// Handle one inbound message. Returns `None` for notifications and
    /// client responses, which get no reply.
    pub async fn handle_message(&self, message: IncomingMessage) -> Option<JsonRpcResponse> {
        let request = match message {
            IncomingMessage::Request(request) => request,
            IncomingMessage::Notification(notification) => {
                self.handle_notification(&notification);
                return None;
            }
            IncomingMessage::Response(response) => {
                tracing::debug!(id = ?response.id, "ignoring client response");
                return None;
            }
        };

        tracing::debug!(method = %request.method, "handling request");

        let id = request.id.clone();
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(&request),
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(&request).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        })
    }

    fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => tracing::debug!("client finished initialization"),
            other => tracing::debug!(method = %other, "ignoring notification"),
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = request
            .params
            .clone()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing initialize parameters"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| {
                    JsonRpcError::invalid_params(format!("Invalid initialize parameters: {}", e))
                })
            })?;

        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol = %params.protocol_version,
            "initialize"
        );

        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(&params.protocol_version).to_string(),
            server_info: self.info.clone(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {}),
            },
        };

        to_result(&result)
    }

    /// Handle list tools request
    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        to_result(&ListToolsResult {
            tools: self.tools.list_tools(),
        })
    }

    /// Handle call tool request
    async fn handle_call_tool(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = match request.params.as_ref() {
            Some(p) => serde_json::from_value(p.clone()).map_err(|e| {
                JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e))
            })?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };

        let result = self
            .tools
            .call_tool(&params.name, params.arguments)
            .await
            .map_err(|e| e.to_json_rpc_error())?;

        to_result(&result)
    }
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> McpServer {
        McpServer::new(ToolRegistry::with_defaults())
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> IncomingMessage {
        IncomingMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        })
    }

    #[test]
    fn test_server_info() {
        assert_eq!(engine().info().name, "mcp-playground");
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0.0.1"}
        });
        let resp = engine()
            .handle_message(request(1, methods::INITIALIZE, Some(params)))
            .await
            .unwrap();

        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_initialize_without_params_is_invalid() {
        let resp = engine()
            .handle_message(request(1, methods::INITIALIZE, None))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let msg = IncomingMessage::Notification(JsonRpcNotification::new(methods::INITIALIZED, None));
        assert!(engine().handle_message(msg).await.is_none());
    }

    #[tokio::test]
    async fn test_call_hello() {
        let resp = engine()
            .handle_message(request(7, methods::CALL_TOOL, Some(json!({"name": "hello"}))))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(RequestId::Number(7)));
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "Hello");
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let resp = engine()
            .handle_message(request(2, methods::CALL_TOOL, Some(json!({"name": "missing"}))))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = engine()
            .handle_message(request(3, "resources/list", None))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }
}
