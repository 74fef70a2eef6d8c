//! The `hello` tool

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ToolRegistry;
use crate::mcp::types::{CallToolResult, Tool};

/// `hello` takes no arguments
#[derive(Debug, Deserialize, JsonSchema)]
pub struct HelloArgs {}

fn input_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(HelloArgs))
        .unwrap_or_else(|_| json!({"type": "object", "properties": {}}))
}

/// Register `hello` on the registry
pub fn register(registry: &mut ToolRegistry) {
    let definition = Tool {
        name: "hello".to_string(),
        title: Some("hello tool".to_string()),
        description: Some("hello world".to_string()),
        input_schema: input_schema(),
    };

    registry.register(definition, |_args| async { CallToolResult::text("Hello") });
}
