//! Long-running process mode

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;

use crate::error::HostingError;

/// Serve `app` on `0.0.0.0:port` until `shutdown` resolves.
///
/// `shutdown` must end every open server-push stream (by closing the
/// sessions), or the graceful drain waits for them forever.
pub async fn serve<F>(app: Router, port: u16, shutdown: F) -> Result<(), HostingError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HostingError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    tracing::info!("Server running on port {}", port);
    tracing::info!("Health check: http://localhost:{}/health", port);
    tracing::info!("MCP endpoint: http://localhost:{}/mcp", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(HostingError::Serve)
}
