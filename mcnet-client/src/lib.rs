//! # mcnet Client Core
//!
//! Purpose: Connection and request-batching core of a memcached client.
//! Establishes non-blocking TCP, UDP and local-socket connections to cache
//! nodes behind a per-server circuit breaker, and accumulates hash-annotated
//! keys for a single pipelined multi-get.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` owns servers and capabilities.
//! 2. **Classified Errors**: Connect outcomes are a closed set of variants.
//! 3. **Bounded Waits**: The only blocking point is the connect readiness wait.
//! 4. **Capability Injection**: Hashing, allocation accounting and
//!    redistribution are trait objects supplied at build time.

mod batch;
mod client;
mod connect;
mod server;
mod socket;

pub use batch::{Batch, BatchEntry};
pub use client::{Client, ClientBuilder, Distribution, NoopDistribution};
pub use connect::{connect, connect_at};
pub use server::{Server, ServerState};

pub use mcnet_common::{
    Behavior, BehaviorFlags, BatchError, ClientConfig, ConnectError, Disconnected, ServerSpec,
    Transport,
};
