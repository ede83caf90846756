use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "roomcall", about = "Two-party WebRTC signaling gateway")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds between server pings.
    #[arg(long, env = "PING_INTERVAL_SECS", default_value_t = 25)]
    pub ping_interval_secs: u64,

    /// Drop a connection after this many silent seconds.
    #[arg(long, env = "PING_TIMEOUT_SECS", default_value_t = 60)]
    pub ping_timeout_secs: u64,

    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = 64 * 1024)]
    pub max_message_bytes: usize,

    /// Fallback filter when RUST_LOG is unset.
    #[arg(long, env = "LOG", default_value = "roomcall=info,tower_http=info")]
    pub log: String,
}

impl Config {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ping_interval_secs: 25,
            ping_timeout_secs: 60,
            max_message_bytes: 64 * 1024,
            log: "roomcall=info,tower_http=info".to_string(),
        }
    }
}
