//! Runtime configuration: command-line flags with environment fallbacks, and
//! the validated [`ServerConfig`] the server is built from.

use crate::error::ServerError;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_TCP_PORT: u16 = 12345;
pub const DEFAULT_TICK_RATE: u32 = 20;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_CLIENTS: usize = 256;
/// Longest accepted inbound line on the stream transport.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Host address both listeners bind to
    #[arg(short = 'H', long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port of the newline-delimited TCP transport
    #[arg(short, long, env = "RELAY_PORT", default_value_t = DEFAULT_TCP_PORT)]
    pub port: u16,
    /// Port of the WebSocket transport (disabled when unset)
    #[arg(long, env = "PORT")]
    pub ws_port: Option<u16>,
    /// State broadcasts per second
    #[arg(short, long, env = "RELAY_TICK_RATE", default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
    /// Seconds without inbound traffic before a connection is dropped (0 disables)
    #[arg(long, env = "RELAY_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout: u64,
    /// Upper bound for a single socket write, in milliseconds
    #[arg(long, env = "RELAY_SEND_TIMEOUT_MS", default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,
    /// Frames buffered per connection before it is considered stalled
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE", default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,
    /// Maximum concurrent connections
    #[arg(long, env = "RELAY_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,
}

impl Args {
    pub fn into_config(self) -> Result<ServerConfig, ServerError> {
        let config = ServerConfig {
            tcp_addr: format!("{}:{}", self.host, self.port),
            ws_addr: self.ws_port.map(|port| format!("{}:{}", self.host, port)),
            tick_rate: self.tick_rate,
            idle_timeout: match self.idle_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            outbound_queue: self.outbound_queue,
            max_clients: self.max_clients,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_addr: String,
    pub ws_addr: Option<String>,
    /// Broadcast Scheduler cadence in Hz
    pub tick_rate: u32,
    pub idle_timeout: Option<Duration>,
    pub send_timeout: Duration,
    pub outbound_queue: usize,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: format!("0.0.0.0:{}", DEFAULT_TCP_PORT),
            ws_addr: None,
            tick_rate: DEFAULT_TICK_RATE,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

impl ServerConfig {
    /// A loopback configuration on ephemeral ports, used by tests.
    pub fn local() -> Self {
        Self {
            tcp_addr: "127.0.0.1:0".to_string(),
            ws_addr: Some("127.0.0.1:0".to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if !(1..=1000).contains(&self.tick_rate) {
            return Err(ServerError::Config(format!(
                "tick rate must be between 1 and 1000 Hz, got {}",
                self.tick_rate
            )));
        }
        if self.outbound_queue == 0 {
            return Err(ServerError::Config(
                "outbound queue must hold at least one frame".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(ServerError::Config(
                "max clients must be at least 1".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ServerError::Config(
                "send timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }
}
