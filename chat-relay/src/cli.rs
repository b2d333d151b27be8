use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{ConfigError, RelayConfig},
    protocol::DEFAULT_PORT,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TOML configuration file. Every key is optional.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Socket address to listen on; overrides the config file. Use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

impl ServerArgs {
    /// Builds the effective configuration: file (or defaults), then flags.
    pub fn resolve(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host running the relay.
    #[arg(default_value = "127.0.0.1")]
    pub host: String,

    /// Port the relay listens on.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
