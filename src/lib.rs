//! MCP Playground Server Library
//!
//! A remote Model Context Protocol (MCP) server over streamable HTTP.
//! Each client conversation is bound to its own session and transport,
//! addressed by the `Mcp-Session-Id` header.

pub mod config;
pub mod error;
pub mod hosting;
pub mod http;
pub mod mcp;
pub mod session;

pub use config::Config;
pub use error::{PlaygroundError, Result};
