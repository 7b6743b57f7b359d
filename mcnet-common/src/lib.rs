// mcnet-common - Shared types for the mcnet client
//
// Errors, configuration, and the capability traits (hashing, allocation)
// injected into the client handle.

pub mod allocator;
pub mod config;
pub mod error;
pub mod hash;

// Re-export for convenience
pub use allocator::*;
pub use config::*;
pub use error::*;
pub use hash::*;
