//! Server configuration, resolved from the environment at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_MAX_SEND_QUEUE: usize = 256;
const DEFAULT_PING_INTERVAL_SECS: u64 = 20;
const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CLOSE_GRACE_SECS: u64 = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Per-client outbound queue capacity.
    pub max_send_queue: usize,
    /// How often the writer pings an idle client.
    pub ping_interval_secs: u64,
    /// How long past a ping before an unresponsive client is dropped.
    pub pong_timeout_secs: u64,
    /// How long shutdown waits for in-flight sessions to close.
    pub close_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_send_queue: DEFAULT_MAX_SEND_QUEUE,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            pong_timeout_secs: DEFAULT_PONG_TIMEOUT_SECS,
            close_grace_secs: DEFAULT_CLOSE_GRACE_SECS,
        }
    }
}

impl ServerConfig {
    /// Build a config from `RELAY_HOST` and `PORT`, falling back to defaults.
    ///
    /// An unparseable `PORT` is logged and ignored rather than fatal.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("RELAY_HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }

        if let Ok(raw) = std::env::var("PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    warn!(value = %raw, default = DEFAULT_PORT, "invalid PORT, using default");
                }
            }
        }

        config
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
