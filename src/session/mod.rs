//! Session lifecycle management for the streamable HTTP transport
//!
//! Maps stateless HTTP requests onto long-lived protocol sessions: creation on
//! initialize, lookup by `Mcp-Session-Id`, and teardown on DELETE, stream
//! disconnect or shutdown.

pub mod id;
pub mod registry;
pub mod router;
pub mod state;
pub mod stateless;
pub mod transport;

pub use id::SessionId;
pub use registry::{InitializedSession, SessionRegistry, SessionRequest};
pub use router::{Routed, SessionRouter};
pub use state::SessionState;
pub use stateless::SharedSession;
pub use transport::{EventStream, ServerEvent, SessionLifecycle, StreamableTransport, TransportResponse};

/// Header carrying the session id, in its canonical casing
pub const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
