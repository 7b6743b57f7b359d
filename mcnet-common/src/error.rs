//! # Error Types
//!
//! Classified outcomes for connection and batch operations. Every connect
//! attempt resolves to exactly one `ConnectError` variant so callers can
//! decide between retrying, escalating, or inspecting the OS error.

use thiserror::Error;

/// Result type for connection operations.
pub type ConnectResult<T> = Result<T, ConnectError>;

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Outcome of a failed connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Name resolution failed before any socket was created.
    #[error("host lookup failed for {host}:{port}")]
    HostLookupFailure { host: String, port: u16 },

    /// `socket()` itself failed; carries the OS error code.
    #[error("socket creation failed (os error {0})")]
    SocketCreateFailure(i32),

    /// The descriptor could not be switched into non-blocking mode.
    #[error("connection setup failed")]
    ConnectionFailure,

    /// A specific OS error from `connect()` or `getsockopt()`.
    #[error("connect failed (os error {0})")]
    Errno(i32),

    /// Every candidate was exhausted without a specific OS error.
    #[error("connect timed out")]
    Timeout,

    /// The circuit breaker is open for this server.
    #[error("server marked dead")]
    ServerMarkedDead,

    /// The server carries a transport kind this client cannot drive.
    #[error("transport not supported")]
    NotSupported,
}

impl ConnectError {
    /// True for outcomes that are always safe to retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Timeout | ConnectError::ServerMarkedDead)
    }

    /// Returns the embedded OS error code, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ConnectError::Errno(code) | ConnectError::SocketCreateFailure(code) => Some(*code),
            _ => None,
        }
    }
}

/// Diagnostic returned when a client-level connect fails.
///
/// Identifies the server that was most recently disconnected, so callers
/// (and the distribution layer) never need a shared "last failed" slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server #{index} ({label}): {error}")]
pub struct Disconnected {
    /// Position of the server in the client's list.
    pub index: usize,
    /// `host:port` (or socket path) of the server.
    pub label: String,
    /// What went wrong.
    #[source]
    pub error: ConnectError,
}

/// Allocation failures surfaced by the allocator capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Requested size does not fit in `usize`.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator refused to grant `requested` more bytes.
    #[error("allocation of {requested} bytes refused")]
    Refused { requested: usize },
}

/// Errors surfaced by batch construction and growth.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Allocator capability denied the request.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// The global allocator could not reserve backing storage.
    #[error("out of memory")]
    OutOfMemory,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON could not be parsed into the expected shape.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// A field held a value outside its accepted range.
    #[error("invalid config value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },
}
