use std::time::Duration;

use crate::net::{DEFAULT_PORT, FaultInjection, TransportConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a disconnected player may take to come back.
    pub reconnect_window: Duration,
    /// Spacing of the countdown notices while a slot is suspended.
    pub countdown_interval: Duration,
    /// Connections that have not sent `USER` by then are dropped.
    pub hello_timeout: Duration,
    pub tick_interval: Duration,
    pub require_reconnect_token: bool,
    pub transport: TransportConfig,
    pub faults: Option<FaultInjection>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            reconnect_window: Duration::from_secs(60),
            countdown_interval: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            require_reconnect_token: false,
            transport: TransportConfig::default(),
            faults: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
