//! MCP Playground Server
//!
//! Remote Model Context Protocol (MCP) server over streamable HTTP, hosted
//! either as a long-running process or as a cloud function.

use anyhow::Context;
use clap::Parser;

use mcp_playground::config::{env, Config, DeploymentMode, SessionMode};
use mcp_playground::error::{ConfigError, Result};
use mcp_playground::hosting::{self, function, process};
use mcp_playground::http::{router, AppState};

/// MCP Playground Server
#[derive(Parser)]
#[command(name = "mcp-playground")]
#[command(author, version, about = "MCP Playground - A remote Model Context Protocol server")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Session handling mode (overrides MCP_SESSION_MODE)
    #[arg(long, value_enum)]
    session_mode: Option<SessionMode>,

    /// Hosting mode (overrides MCP_DEPLOYMENT)
    #[arg(long, value_enum)]
    deployment: Option<DeploymentMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::new().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(mode) = cli.session_mode {
        config.session_mode = mode;
    }
    if let Some(deployment) = cli.deployment {
        config.deployment = deployment;
    }
    config.validate()?;

    tracing::info!(
        deployment = %config.deployment,
        session_mode = %config.session_mode,
        environment = %config.environment,
        "starting MCP playground server"
    );

    run_server(config).await.context("server failed")
}

async fn run_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone())?;
    let sessions = state.sessions().clone();
    let app = router(state);

    let shutdown = {
        let sessions = sessions.clone();
        async move {
            hosting::shutdown_signal().await;
            let closed = sessions.shutdown().await;
            tracing::info!(closed, "sessions closed, draining");
        }
    };

    match config.deployment {
        DeploymentMode::Process => process::serve(app, config.port, shutdown).await?,
        DeploymentMode::Function => {
            let runtime_api = config.runtime_api.as_deref().ok_or_else(|| ConfigError::MissingEnvVar {
                var: env::RUNTIME_API.to_string(),
            })?;
            function::run(app, runtime_api, config.function_stream_window, shutdown).await?
        }
    }

    sessions.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}
