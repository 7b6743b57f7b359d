//! # Client Handle
//!
//! Purpose: Own the server list and configuration, and carry the injected
//! capabilities (hasher, allocator, distribution) that servers and batches
//! reach through it.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides the connect path behind an index.
//! 2. **Strategy Pattern**: Capabilities are trait objects chosen at build time.
//! 3. **Explicit Diagnostics**: A failed connect returns `Disconnected`
//!    naming the server instead of stashing it on the handle.
//! 4. **Single Owner**: The handle is not synchronized; use one per thread.

use std::sync::Arc;
use std::time::Instant;

use mcnet_common::{
    Allocator, Behavior, BatchResult, ClientConfig, ConnectError, Disconnected, HashAlgorithm,
    KeyHasher, ServerSpec, SystemAllocator,
};
use tracing::debug;

use crate::batch::Batch;
use crate::connect;
use crate::server::Server;

/// Recomputes the key-to-server distribution.
///
/// Invoked after a connect short-circuits on a dead server while
/// `auto_eject_hosts` is enabled.
pub trait Distribution: Send + Sync {
    fn redistribute(&self, client: &Client);
}

/// Distribution that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDistribution;

impl Distribution for NoopDistribution {
    fn redistribute(&self, _client: &Client) {}
}

/// Builder wiring configuration, servers and capabilities together.
pub struct ClientBuilder {
    config: ClientConfig,
    servers: Vec<ServerSpec>,
    hasher: Arc<dyn KeyHasher>,
    allocator: Arc<dyn Allocator>,
    distribution: Arc<dyn Distribution>,
}

impl ClientBuilder {
    pub fn server(mut self, spec: ServerSpec) -> Self {
        self.servers.push(spec);
        self
    }

    pub fn servers(mut self, specs: impl IntoIterator<Item = ServerSpec>) -> Self {
        self.servers.extend(specs);
        self
    }

    pub fn hasher(mut self, hasher: impl KeyHasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn distribution(mut self, distribution: Arc<dyn Distribution>) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn build(self) -> Client {
        Client {
            config: self.config,
            servers: self.servers.into_iter().map(Server::new).collect(),
            hasher: self.hasher,
            allocator: self.allocator,
            distribution: self.distribution,
        }
    }
}

/// The client handle ("root").
pub struct Client {
    config: ClientConfig,
    servers: Vec<Server>,
    hasher: Arc<dyn KeyHasher>,
    allocator: Arc<dyn Allocator>,
    distribution: Arc<dyn Distribution>,
}

impl Client {
    /// Creates a client with default capabilities and no servers.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            servers: Vec::new(),
            hasher: Arc::new(HashAlgorithm::default()),
            allocator: Arc::new(SystemAllocator),
            distribution: Arc::new(NoopDistribution),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn behavior(&self, behavior: Behavior) -> bool {
        self.config.behavior(behavior)
    }

    pub fn set_behavior(&mut self, behavior: Behavior, enabled: bool) {
        self.config.set_behavior(behavior, enabled);
    }

    /// Appends a server and returns its index.
    pub fn add_server(&mut self, spec: ServerSpec) -> usize {
        self.servers.push(Server::new(spec));
        self.servers.len() - 1
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn server(&self, index: usize) -> Option<&Server> {
        self.servers.get(index)
    }

    pub fn server_mut(&mut self, index: usize) -> Option<&mut Server> {
        self.servers.get_mut(index)
    }

    /// Indices of servers whose breaker is closed at `now`.
    pub fn live_servers(&self, now: Instant) -> Vec<usize> {
        self.servers
            .iter()
            .enumerate()
            .filter(|(_, server)| !server.is_dead_at(&self.config, now))
            .map(|(index, _)| index)
            .collect()
    }

    /// Routing hash of `key` under the configured algorithm.
    pub fn generate_hash(&self, key: &[u8]) -> u32 {
        self.hasher.hash(key)
    }

    pub fn hasher(&self) -> Arc<dyn KeyHasher> {
        Arc::clone(&self.hasher)
    }

    pub fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator)
    }

    /// New batch with room for one key.
    pub fn batch(&self) -> BatchResult<Batch> {
        Batch::create(self)
    }

    pub fn batch_sized(&self, capacity_hint: usize) -> BatchResult<Batch> {
        Batch::create_sized(self, capacity_hint)
    }

    /// Ensures server `index` has a live descriptor.
    pub fn connect(&mut self, index: usize) -> Result<(), Disconnected> {
        self.connect_at(index, Instant::now())
    }

    /// [`Client::connect`] with an explicit clock.
    pub fn connect_at(&mut self, index: usize, now: Instant) -> Result<(), Disconnected> {
        let Some(server) = self.servers.get_mut(index) else {
            return Err(Disconnected {
                index,
                label: format!("#{index}"),
                error: ConnectError::NotSupported,
            });
        };

        let error = match connect::connect_at(server, &self.config, now) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        let label = server.label();

        if error == ConnectError::ServerMarkedDead && self.config.behavior.auto_eject_hosts {
            debug!(server = %label, "ejecting dead server from distribution");
            let distribution = Arc::clone(&self.distribution);
            distribution.redistribute(self);
        }

        Err(Disconnected { index, label, error })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}
