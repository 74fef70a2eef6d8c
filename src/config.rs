//! Configuration management for the MCP playground server
//!
//! Settings come from environment variables with defaults; the binary layers
//! CLI flags on top.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::{ConfigError, PlaygroundError, Result};

/// How requests map onto protocol sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionMode {
    /// One registry entry per client conversation (default)
    Stateful,
    /// One shared transport, no session ids; clients are not isolated
    Stateless,
}

/// How the process is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeploymentMode {
    /// Long-running TCP listener
    Process,
    /// Cloud function behind an HTTP gateway
    Function,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Stateful => "stateful",
            SessionMode::Stateless => "stateless",
        }
    }
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Process => "process",
            DeploymentMode::Function => "function",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Environment variable names
pub mod env {
    pub const PORT: &str = "PORT";
    pub const ENVIRONMENT: &str = "MCP_ENVIRONMENT";
    pub const DEPLOYMENT: &str = "MCP_DEPLOYMENT";
    pub const SESSION_MODE: &str = "MCP_SESSION_MODE";
    pub const SSE_KEEPALIVE_SECS: &str = "MCP_SSE_KEEPALIVE_SECS";
    pub const FUNCTION_STREAM_WINDOW_MS: &str = "MCP_FUNCTION_STREAM_WINDOW_MS";
    pub const RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";
}

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Configuration for the MCP playground server
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (process mode)
    pub port: u16,

    /// Deployment environment name, reported by `/health`
    pub environment: String,

    /// Hosting mode
    pub deployment: DeploymentMode,

    /// Session handling mode
    pub session_mode: SessionMode,

    /// Interval between SSE keep-alive comments
    pub sse_keep_alive: Duration,

    /// Longest a function invocation buffers a streamed response body
    pub function_stream_window: Duration,

    /// Function runtime API host, required in function mode
    pub runtime_api: Option<String>,
}

impl Config {
    /// Create a configuration from the process environment
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            port: parse_var(&lookup, env::PORT)?.unwrap_or(DEFAULT_PORT),
            environment: lookup(env::ENVIRONMENT).unwrap_or_else(|| "development".to_string()),
            deployment: parse_var(&lookup, env::DEPLOYMENT)?.unwrap_or(DeploymentMode::Process),
            session_mode: parse_var(&lookup, env::SESSION_MODE)?.unwrap_or(SessionMode::Stateful),
            sse_keep_alive: Duration::from_secs(
                parse_var(&lookup, env::SSE_KEEPALIVE_SECS)?.unwrap_or(15),
            ),
            function_stream_window: Duration::from_millis(
                parse_var(&lookup, env::FUNCTION_STREAM_WINDOW_MS)?.unwrap_or(25_000),
            ),
            runtime_api: lookup(env::RUNTIME_API).filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements
    pub fn validate(&self) -> Result<()> {
        if self.deployment == DeploymentMode::Function && self.runtime_api.is_none() {
            return Err(PlaygroundError::Config(ConfigError::MissingEnvVar {
                var: env::RUNTIME_API.to_string(),
            }));
        }
        if self.sse_keep_alive.is_zero() {
            return Err(PlaygroundError::Config(ConfigError::InvalidValue {
                var: env::SSE_KEEPALIVE_SECS.to_string(),
                value: "0".to_string(),
            }));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            environment: "development".to_string(),
            deployment: DeploymentMode::Process,
            session_mode: SessionMode::Stateful,
            sse_keep_alive: Duration::from_secs(15),
            function_stream_window: Duration::from_millis(25_000),
            runtime_api: None,
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            PlaygroundError::Config(ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            })
        }),
    }
}
