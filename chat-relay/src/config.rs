//! Relay configuration.
//!
//! Every key has a default, so an absent or partial TOML file is fine:
//!
//! ```toml
//! listen = "0.0.0.0:50001"
//! idle_timeout_ms = 10000
//! max_clients = 1000
//! max_line_length = 1023
//! greeting = "Hello, Welcome in this chat"
//! ```

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::{DEFAULT_GREETING, DEFAULT_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// How long one readiness wait may block before an idle wake-up.
    pub idle_timeout_ms: u64,
    /// Connections beyond this many live clients are refused.
    pub max_clients: usize,
    /// Longest line in bytes; longer input is split into lines of this size.
    pub max_line_length: usize,
    /// Middle line of the welcome banner.
    pub greeting: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            idle_timeout_ms: 10_000,
            max_clients: 1000,
            max_line_length: 1023,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1"));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid("max_line_length must be at least 1"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("idle_timeout_ms must be at least 1"));
        }
        if self.greeting.trim().is_empty() {
            return Err(ConfigError::Invalid("greeting must not be empty"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
