//! # Client Configuration
//!
//! Purpose: Describe the tunables the connection layer reads from the client
//! handle: socket timeouts and buffer sizes, the connect wait, the circuit
//! breaker thresholds, and the boolean behavior flags.
//!
//! ## Design Principles
//! 1. **Zero Means Unset**: Numeric fields use 0 for "leave the OS default",
//!    matching how the values are applied to sockets.
//! 2. **Plain Data**: Config is `serde`-friendly so it can be loaded from JSON.
//! 3. **Typed Accessors**: Callers read typed `Duration`s rather than raw units.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// Default bounded wait for a non-blocking connect, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
    UnixSocket,
    /// Placeholder for servers whose transport was never set. Connecting to
    /// one is a configuration defect.
    Unknown,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::UnixSocket => "unix",
            Transport::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Identity of one remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Hostname, literal address, or socket path for `UnixSocket`.
    pub host: String,
    /// Port; ignored for `UnixSocket`.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ServerSpec {
    /// TCP server on `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ServerSpec {
            host: host.into(),
            port,
            transport: Transport::Tcp,
        }
    }

    /// UDP server on `host:port`.
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        ServerSpec {
            host: host.into(),
            port,
            transport: Transport::Udp,
        }
    }

    /// Local domain socket at `path`.
    pub fn unix(path: impl Into<String>) -> Self {
        ServerSpec {
            host: path.into(),
            port: 0,
            transport: Transport::UnixSocket,
        }
    }

    /// Human-readable label used in logs and diagnostics.
    pub fn label(&self) -> String {
        match self.transport {
            Transport::UnixSocket => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Boolean behaviors consulted by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorFlags {
    /// Set `TCP_NODELAY` on new stream sockets.
    pub tcp_nodelay: bool,
    /// Abortive close: `SO_LINGER` with a zero timeout.
    pub no_block: bool,
    /// Reuse a server's resolved addresses across connects.
    pub cache_lookups: bool,
    /// Ask the distribution layer to recompute when a server is dead.
    pub auto_eject_hosts: bool,
}

/// Named handle for a single behavior flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    TcpNoDelay,
    NoBlock,
    CacheLookups,
    AutoEjectHosts,
}

/// Configuration read by connect and batch operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `SO_SNDTIMEO` in microseconds; 0 leaves the OS default.
    pub send_timeout_us: u64,
    /// `SO_RCVTIMEO` in microseconds; 0 leaves the OS default.
    pub recv_timeout_us: u64,
    /// `SO_SNDBUF` in bytes; 0 leaves the OS default.
    pub send_buffer_size: u32,
    /// `SO_RCVBUF` in bytes; 0 leaves the OS default.
    pub recv_buffer_size: u32,
    /// Upper bound on the write-readiness wait of a non-blocking connect.
    pub connect_timeout_ms: u64,
    /// Cooldown after a failed connect; 0 disables retry scheduling.
    pub retry_timeout_secs: u64,
    /// Consecutive failures before the circuit opens; 0 disables it.
    pub server_failure_limit: u32,
    pub behavior: BehaviorFlags,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            send_timeout_us: 0,
            recv_timeout_us: 0,
            send_buffer_size: 0,
            recv_buffer_size: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_timeout_secs: 0,
            server_failure_limit: 0,
            behavior: BehaviorFlags::default(),
        }
    }
}

impl ClientConfig {
    /// Parses a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        nonzero(self.send_timeout_us).map(Duration::from_micros)
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        nonzero(self.recv_timeout_us).map(Duration::from_micros)
    }

    /// Connect wait. A zero value means "do not wait at all".
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Option<Duration> {
        nonzero(self.retry_timeout_secs).map(Duration::from_secs)
    }

    /// True when both thresholds needed by the circuit breaker are set.
    pub fn circuit_breaker_enabled(&self) -> bool {
        self.retry_timeout_secs > 0 && self.server_failure_limit > 0
    }

    /// Reads one behavior flag.
    pub fn behavior(&self, behavior: Behavior) -> bool {
        match behavior {
            Behavior::TcpNoDelay => self.behavior.tcp_nodelay,
            Behavior::NoBlock => self.behavior.no_block,
            Behavior::CacheLookups => self.behavior.cache_lookups,
            Behavior::AutoEjectHosts => self.behavior.auto_eject_hosts,
        }
    }

    /// Toggles one behavior flag.
    pub fn set_behavior(&mut self, behavior: Behavior, enabled: bool) {
        let slot = match behavior {
            Behavior::TcpNoDelay => &mut self.behavior.tcp_nodelay,
            Behavior::NoBlock => &mut self.behavior.no_block,
            Behavior::CacheLookups => &mut self.behavior.cache_lookups,
            Behavior::AutoEjectHosts => &mut self.behavior.auto_eject_hosts,
        };
        *slot = enabled;
    }
}

fn nonzero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

/// Client settings plus the server list, as loaded by tooling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
}

impl ProbeConfig {
    /// Parses and validates a probe config from JSON.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: ProbeConfig = serde_json::from_str(raw)?;
        for server in &config.servers {
            server.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_breaker_disabled() {
        let config = ClientConfig::default();
        assert!(!config.circuit_breaker_enabled());
        assert_eq!(config.connect_timeout(), Duration::from_millis(1000));
        assert_eq!(config.send_timeout(), None);
        assert_eq!(config.retry_timeout(), None);
    }

    #[test]
    fn breaker_needs_both_thresholds() {
        let mut config = ClientConfig {
            retry_timeout_secs: 5,
            ..ClientConfig::default()
        };
        assert!(!config.circuit_breaker_enabled());
        config.server_failure_limit = 3;
        assert!(config.circuit_breaker_enabled());
    }

    #[test]
    fn behavior_toggle_roundtrip() {
        let mut config = ClientConfig::default();
        config.set_behavior(Behavior::AutoEjectHosts, true);
        assert!(config.behavior(Behavior::AutoEjectHosts));
        assert!(!config.behavior(Behavior::TcpNoDelay));
        config.set_behavior(Behavior::AutoEjectHosts, false);
        assert!(!config.behavior.auto_eject_hosts);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{"retry_timeout_secs": 2, "behavior": {"tcp_nodelay": true}}"#,
        )
        .unwrap();
        assert_eq!(config.retry_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert!(config.behavior.tcp_nodelay);
        assert!(!config.behavior.no_block);
    }

    #[test]
    fn probe_config_parses_servers() {
        let config = ProbeConfig::from_json_str(
            r#"{
                "servers": [
                    {"host": "cache-a"},
                    {"host": "/tmp/mc.sock", "transport": "unix_socket"},
                    {"host": "cache-b", "port": 22122, "transport": "udp"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.servers[0], ServerSpec::tcp("cache-a", DEFAULT_PORT));
        assert_eq!(config.servers[1].transport, Transport::UnixSocket);
        assert_eq!(config.servers[2].label(), "cache-b:22122");
    }

    #[test]
    fn probe_config_rejects_empty_host() {
        let err = ProbeConfig::from_json_str(r#"{"servers": [{"host": ""}]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "host", .. }));
    }
}
