//! MCP (Model Context Protocol) module
//!
//! The protocol engine, its message types and the tool registry.

pub mod server;
pub mod tools;
pub mod types;

pub use server::McpServer;
pub use tools::ToolRegistry;
