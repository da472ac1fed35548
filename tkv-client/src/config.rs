//! # Client Configuration
//!
//! Purpose: Describe one endpoint plus the pool and probe settings used to
//! reach it.
//!
//! ## Design Principles
//! 1. **Defaults First**: `ClientConfig::default()` talks to a local server.
//! 2. **Layered Sources**: JSON documents and environment variables only
//!    override the fields they mention.
//! 3. **Validate Once**: Bad settings are rejected before any socket is opened.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tkv_common::IntegerWidth;

use crate::error::{ClientError, ClientResult};

pub const ENV_HOST: &str = "TKV_HOST";
pub const ENV_PORT: &str = "TKV_PORT";
pub const ENV_WIDTH: &str = "TKV_WIDTH";
pub const ENV_MAX_CONNECTIONS: &str = "TKV_MAX_CONNECTIONS";

/// Configuration for the client and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Server host name or IP.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Width of variable-size numeric fields; must match the server.
    pub width: IntegerWidth,
    /// Number of physical connections in the pool.
    pub max_connections: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Writability probe attempts after connect.
    pub writable_attempts: u32,
    /// Upper bound of each probe attempt.
    pub writable_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            width: IntegerWidth::U16,
            max_connections: 1,
            connect_timeout_ms: None,
            writable_attempts: 10,
            writable_delay_ms: 50,
        }
    }
}

impl ClientConfig {
    /// Config for `host:port` with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(raw: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `TKV_HOST`, `TKV_PORT`, `TKV_WIDTH` and
    /// `TKV_MAX_CONNECTIONS`.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();
        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ClientError::Config(format!("{ENV_PORT}={port} is not a port")))?;
        }
        if let Some(width) = lookup(ENV_WIDTH) {
            config.width = IntegerWidth::parse(&width)
                .ok_or_else(|| ClientError::Config(format!("{ENV_WIDTH}={width} is not a width")))?;
        }
        if let Some(max) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = max.trim().parse().map_err(|_| {
                ClientError::Config(format!("{ENV_MAX_CONNECTIONS}={max} is not a count"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ClientError::Config("max_connections must be at least 1".into()));
        }
        if self.writable_attempts == 0 {
            return Err(ClientError::Config("writable_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn writable_delay(&self) -> Duration {
        Duration::from_millis(self.writable_delay_ms)
    }

    /// `host:port`, used in log fields.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
