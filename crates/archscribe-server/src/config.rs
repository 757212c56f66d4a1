// ABOUTME: Configuration loading for the archscribe HTTP server.
// ABOUTME: Reads the storage home and bind address from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:7431";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ARCHSCRIBE_BIND is not a valid socket address: {0}")]
    InvalidBind(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub home: PathBuf,
    pub bind: SocketAddr,
}

impl ServerConfig {
    /// Environment variables:
    /// - ARCHSCRIBE_HOME: task history directory (default: ~/.archscribe)
    /// - ARCHSCRIBE_BIND: socket address to bind (default: 127.0.0.1:7431)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let home = get("ARCHSCRIBE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                get("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".archscribe")
            });

        let bind_str = get("ARCHSCRIBE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        Ok(Self { home, bind })
    }
}
