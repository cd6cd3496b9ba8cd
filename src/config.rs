// MIT License - Copyright (c) 2026 Peter Wright
// Connection and discovery configuration

use std::time::Duration;

use crate::transport::discovery::RetryPolicy;

/// Default TCP port of the GMS bus gateway.
pub const DEFAULT_PORT: u16 = 8234;

/// Arm type for area arming commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmType {
    /// Sicherungsbereich scharf (full/away)
    Away,
    /// Internbereich ein (home)
    Home,
}

/// Configuration for connecting to a GMS gateway.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway host name or IP address
    pub host: String,
    /// Gateway TCP port (default: 8234)
    pub port: u16,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long each command phase waits for the panel's acknowledgement
    pub ack_timeout_ms: u64,
    /// Read timeout of one listener poll; also bounds how long shutdown takes
    pub poll_timeout_ms: u64,
    /// Reconnection delay in milliseconds (base delay for exponential backoff)
    pub reconnect_delay_ms: u64,
    /// Maximum number of connection retries on transient errors (0 = no retries)
    pub max_connect_retries: u32,
    /// Short reads per contact-info query before giving up on a name
    pub discovery_attempts: u32,
    /// Timeout of each of those reads
    pub discovery_interval_ms: u64,
    /// Pause between two contact-info queries, taken without the connection lock
    pub discovery_query_delay_ms: u64,
    /// Answer unsolicited announces with an input/output status query
    pub request_status_on_announce: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.50".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 10000,
            ack_timeout_ms: 5000,
            poll_timeout_ms: 1000,
            reconnect_delay_ms: 5000,
            max_connect_retries: 3,
            discovery_attempts: 30,
            discovery_interval_ms: 100,
            discovery_query_delay_ms: 500,
            request_status_on_announce: false,
        }
    }
}

impl ConnectionConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn discovery_query_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_query_delay_ms)
    }

    /// Response polling policy for contact-info queries.
    pub fn discovery_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.discovery_attempts,
            interval: Duration::from_millis(self.discovery_interval_ms),
        }
    }
}

/// Builder for ConnectionConfig.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn ack_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ack_timeout_ms = ms;
        self
    }

    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.poll_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn discovery_attempts(mut self, attempts: u32) -> Self {
        self.config.discovery_attempts = attempts;
        self
    }

    pub fn discovery_interval_ms(mut self, ms: u64) -> Self {
        self.config.discovery_interval_ms = ms;
        self
    }

    pub fn discovery_query_delay_ms(mut self, ms: u64) -> Self {
        self.config.discovery_query_delay_ms = ms;
        self
    }

    pub fn request_status_on_announce(mut self, enabled: bool) -> Self {
        self.config.request_status_on_announce = enabled;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
