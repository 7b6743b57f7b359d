//! # Server State
//!
//! One remote endpoint: its identity, its transport descriptor, the cached
//! address resolution, and the failure counters driving the circuit breaker.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──close/failure──▶ Disconnected
//!      │  ▲
//!      ▼  │ retry deadline passes
//!     Dead (breaker open; derived from the deadline, never stored)
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Instant;

use mcnet_common::{ClientConfig, ConnectError, ConnectResult, ServerSpec, Transport};

/// Observable connection state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Disconnected,
    Connected,
    /// Breaker open: connects short-circuit until the retry deadline.
    Dead,
}

/// A remote cache node and its transport state.
///
/// The descriptor, when present, has completed the OS-level `connect()`
/// call; it may still be finishing asynchronously. Dropping the server
/// closes it.
#[derive(Debug)]
pub struct Server {
    spec: ServerSpec,
    pub(crate) fd: Option<OwnedFd>,
    pub(crate) addresses: Vec<SocketAddr>,
    pub(crate) addresses_valid: bool,
    pub(crate) failure_count: u32,
    pub(crate) next_retry: Option<Instant>,
    pub(crate) last_errno: Option<i32>,
}

impl Server {
    pub fn new(spec: ServerSpec) -> Self {
        Server {
            spec,
            fd: None,
            addresses: Vec::new(),
            addresses_valid: false,
            failure_count: 0,
            next_retry: None,
            last_errno: None,
        }
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn host(&self) -> &str {
        &self.spec.host
    }

    pub fn port(&self) -> u16 {
        self.spec.port
    }

    pub fn transport(&self) -> Transport {
        self.spec.transport
    }

    /// `host:port`, or the socket path for local servers.
    pub fn label(&self) -> String {
        self.spec.label()
    }

    /// Consecutive failed connects since the last success or breaker arm.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Earliest instant at which a new connect is attempted.
    pub fn next_retry(&self) -> Option<Instant> {
        self.next_retry
    }

    /// Last OS error observed on this server.
    pub fn last_errno(&self) -> Option<i32> {
        self.last_errno
    }

    pub fn is_connected(&self) -> bool {
        self.fd.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Resolved addresses currently cached, in resolution order.
    pub fn cached_addresses(&self) -> &[SocketAddr] {
        if self.addresses_valid {
            &self.addresses
        } else {
            &[]
        }
    }

    /// Drops any cached resolution; the next connect resolves again.
    ///
    /// Anything that changes the host or port must call this.
    pub fn invalidate_address_cache(&mut self) {
        self.addresses.clear();
        self.addresses_valid = false;
    }

    /// Closes the descriptor, if any.
    pub fn close(&mut self) {
        self.fd = None;
    }

    /// True when the breaker would short-circuit a connect at `now`.
    pub fn is_dead_at(&self, config: &ClientConfig, now: Instant) -> bool {
        config.circuit_breaker_enabled() && self.next_retry.is_some_and(|deadline| now < deadline)
    }

    pub fn state_at(&self, config: &ClientConfig, now: Instant) -> ServerState {
        if self.is_connected() {
            ServerState::Connected
        } else if self.is_dead_at(config, now) {
            ServerState::Dead
        } else {
            ServerState::Disconnected
        }
    }

    /// Ensures `addresses` holds a fresh or reusable resolution.
    pub(crate) fn resolve(&mut self, use_cache: bool) -> ConnectResult<()> {
        if self.addresses_valid && use_cache {
            return Ok(());
        }
        let lookup_failure = || ConnectError::HostLookupFailure {
            host: self.spec.host.clone(),
            port: self.spec.port,
        };
        let resolved: Vec<SocketAddr> = (self.spec.host.as_str(), self.spec.port)
            .to_socket_addrs()
            .map_err(|_| lookup_failure())?
            .collect();
        if resolved.is_empty() {
            return Err(lookup_failure());
        }
        self.addresses = resolved;
        self.addresses_valid = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_server_is_disconnected() {
        let server = Server::new(ServerSpec::tcp("127.0.0.1", 11211));
        let config = ClientConfig::default();
        assert_eq!(server.state_at(&config, Instant::now()), ServerState::Disconnected);
        assert_eq!(server.failure_count(), 0);
        assert!(server.raw_fd().is_none());
        assert_eq!(server.label(), "127.0.0.1:11211");
    }

    #[test]
    fn dead_only_when_breaker_enabled() {
        let mut server = Server::new(ServerSpec::tcp("127.0.0.1", 11211));
        let now = Instant::now();
        server.next_retry = Some(now + Duration::from_secs(5));

        let mut config = ClientConfig {
            retry_timeout_secs: 5,
            ..ClientConfig::default()
        };
        assert_eq!(server.state_at(&config, now), ServerState::Disconnected);

        config.server_failure_limit = 1;
        assert_eq!(server.state_at(&config, now), ServerState::Dead);
        assert_eq!(
            server.state_at(&config, now + Duration::from_secs(5)),
            ServerState::Disconnected
        );
    }

    #[test]
    fn resolve_reuses_cache_only_when_enabled() {
        let mut server = Server::new(ServerSpec::tcp("127.0.0.1", 4242));
        let sentinel: SocketAddr = "192.0.2.7:9".parse().unwrap();
        server.addresses = vec![sentinel];
        server.addresses_valid = true;

        server.resolve(true).unwrap();
        assert_eq!(server.cached_addresses().to_vec(), vec![sentinel]);

        server.resolve(false).unwrap();
        let fresh: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        assert_eq!(server.cached_addresses().to_vec(), vec![fresh]);
    }

    #[test]
    fn stale_cache_is_resolved_again() {
        let mut server = Server::new(ServerSpec::tcp("127.0.0.1", 4242));
        server.addresses = vec!["192.0.2.7:9".parse().unwrap()];
        server.addresses_valid = false;

        server.resolve(true).unwrap();
        let fresh: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        assert_eq!(server.cached_addresses().to_vec(), vec![fresh]);
    }

    #[test]
    fn resolve_literal_and_cache() {
        let mut server = Server::new(ServerSpec::tcp("127.0.0.1", 4242));
        server.resolve(true).unwrap();
        let expected: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        assert_eq!(server.cached_addresses().to_vec(), vec![expected]);

        server.invalidate_address_cache();
        assert!(server.cached_addresses().is_empty());
    }
}
