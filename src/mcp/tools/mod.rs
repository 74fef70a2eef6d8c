//! MCP Tool registry
//!
//! A static mapping from tool name to its definition and async handler. Only
//! the protocol engine invokes tools; the session layer never sees them.

pub mod hello;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::McpError;
use crate::mcp::types::{CallToolResult, Tool};

type ToolHandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

struct RegisteredTool {
    definition: Tool,
    handler: ToolHandlerFn,
}

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        hello::register(&mut registry);
        registry
    }

    /// Register a tool, replacing any previous tool with the same name
    pub fn register<F, Fut>(&mut self, definition: Tool, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallToolResult> + Send + 'static,
    {
        let handler: ToolHandlerFn = Arc::new(move |args| handler(args).boxed());
        tracing::debug!(tool = %definition.name, "registered tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
    }

    /// List all available tools, sorted by name
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult, McpError> {
        let tool = self.tools.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;

        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(McpError::InvalidArguments {
                    message: format!("expected an object, got {}", other),
                })
            }
        };

        // Clone the handler so the registry borrow ends before the await
        let handler = Arc::clone(&tool.handler);
        Ok(handler(args).await)
    }
}
