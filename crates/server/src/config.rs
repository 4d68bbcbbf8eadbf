// crates/server/src/config.rs
//! Command-line and environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use claude_relay_core::{default_claude_home, DiscoveryError};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47893;

#[derive(Debug, Clone, Parser)]
#[command(name = "claude-relay", version, about = "Conversation history and live stream relay for Claude Code")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "CLAUDE_RELAY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "CLAUDE_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Claude home directory holding `projects/`. Defaults to `~/.claude`.
    #[arg(long, env = "CLAUDE_HOME")]
    pub claude_home: Option<PathBuf>,

    /// Seconds between heartbeats on idle streams.
    #[arg(long, env = "CLAUDE_RELAY_HEARTBEAT_SECS", default_value_t = 30)]
    pub heartbeat_secs: u64,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn resolve_claude_home(&self) -> Result<PathBuf, DiscoveryError> {
        match &self.claude_home {
            Some(path) => Ok(path.clone()),
            None => default_claude_home(),
        }
    }
}
