//! # Connection Manager
//!
//! Purpose: Bring one server's transport up: resolve, open, tune, and
//! connect without ever blocking past the configured connect timeout, while a
//! per-server circuit breaker keeps dead nodes from being hammered.
//!
//! ## Design Principles
//! 1. **Classified Outcomes**: Every call ends in exactly one `ConnectError`
//!    variant or success; nothing is retried silently except interrupted or
//!    in-progress system calls.
//! 2. **Non-Blocking Always**: Inet sockets are switched to `O_NONBLOCK` before
//!    `connect()`, and the only wait is a bounded `poll` for writability.
//! 3. **Ordered Candidates**: Addresses are tried in resolution order and the
//!    first live descriptor wins.
//! 4. **Explicit Clock**: `connect_at` takes `now` so breaker timing is
//!    deterministic under test.

use std::io;
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use mcnet_common::{ClientConfig, ConnectError, ConnectResult, Transport};

use crate::server::Server;
use crate::socket::{self, RawAddr, SocketKind};

/// Spins allowed on `EINPROGRESS`/`EALREADY`/`EINTR` for local sockets.
const UNIX_CONNECT_SPINS: usize = 1024;

/// Result of driving the transport-specific connect path.
enum Attempt {
    Connected,
    /// No candidate produced a descriptor; carries the last OS error seen.
    Exhausted { errno: Option<i32> },
}

/// Connects `server` using the current time.
pub fn connect(server: &mut Server, config: &ClientConfig) -> ConnectResult<()> {
    connect_at(server, config, Instant::now())
}

/// Connects `server` as if the current time were `now`.
///
/// Returns immediately when the server already holds a descriptor.
pub fn connect_at(server: &mut Server, config: &ClientConfig, now: Instant) -> ConnectResult<()> {
    if let Some(retry) = config.retry_timeout() {
        let limit = config.server_failure_limit;
        if limit > 0 {
            if server.failure_count >= limit {
                server.next_retry = Some(retry_deadline(now, retry));
                server.failure_count = 0;
                warn!(
                    server = %server.label(),
                    retry_secs = retry.as_secs(),
                    "failure limit reached; marking server dead"
                );
            }
            if server.next_retry.is_some_and(|deadline| now < deadline) {
                debug!(server = %server.label(), "server marked dead; skipping connect");
                return Err(ConnectError::ServerMarkedDead);
            }
        }
    }

    let attempt = match server.transport() {
        Transport::UnixSocket => unix_connect(server)?,
        Transport::Tcp | Transport::Udp => network_connect(server, config)?,
        Transport::Unknown => {
            error!(server = %server.label(), "connect requested for unknown transport");
            return Err(ConnectError::NotSupported);
        }
    };

    match attempt {
        Attempt::Connected => {
            server.failure_count = 0;
            Ok(())
        }
        Attempt::Exhausted { errno } => {
            if let Some(retry) = config.retry_timeout() {
                server.next_retry = Some(retry_deadline(now, retry));
            }
            server.failure_count = server.failure_count.saturating_add(1);
            warn!(
                server = %server.label(),
                failures = server.failure_count,
                errno = ?errno,
                "connect failed"
            );
            Err(match errno {
                Some(code) => ConnectError::Errno(code),
                None => ConnectError::Timeout,
            })
        }
    }
}

fn unix_connect(server: &mut Server) -> ConnectResult<Attempt> {
    if server.fd.is_some() {
        return Ok(Attempt::Connected);
    }

    let fd = socket::open_unix_stream().map_err(|err| create_failure(server, &err))?;
    let addr = match RawAddr::from_unix_path(server.host()) {
        Ok(addr) => addr,
        Err(err) => return Ok(exhausted(server, &err)),
    };

    let mut spins = 0;
    loop {
        let err = match socket::connect(&fd, &addr) {
            Ok(()) => break,
            Err(err) => err,
        };
        match err.raw_os_error() {
            Some(libc::EINPROGRESS | libc::EALREADY | libc::EINTR) if spins < UNIX_CONNECT_SPINS => {
                spins += 1;
            }
            Some(libc::EISCONN) => break,
            _ => {
                debug!(server = %server.label(), error = %err, "local socket connect failed");
                return Ok(exhausted(server, &err));
            }
        }
    }

    server.fd = Some(fd);
    Ok(Attempt::Connected)
}

fn network_connect(server: &mut Server, config: &ClientConfig) -> ConnectResult<Attempt> {
    if server.fd.is_some() {
        return Ok(Attempt::Connected);
    }

    server.resolve(config.behavior.cache_lookups)?;

    let transport = server.transport();
    let kind = match transport {
        Transport::Udp => SocketKind::Datagram,
        _ => SocketKind::Stream,
    };

    let mut last_errno = None;
    let candidates = server.addresses.clone();
    for addr in &candidates {
        // Memcached does not speak UDP over IPv6.
        if transport == Transport::Udp && !addr.is_ipv4() {
            trace!(server = %server.label(), %addr, "skipping non-ipv4 udp candidate");
            continue;
        }

        let fd = socket::open_inet(addr, kind).map_err(|err| create_failure(server, &err))?;
        tune(&fd, transport, config, server)?;

        match connect_candidate(&fd, &RawAddr::from_inet(addr), config) {
            Ok(()) => {
                trace!(server = %server.label(), %addr, "connected");
                server.fd = Some(fd);
                return Ok(Attempt::Connected);
            }
            Err(errno) => {
                debug!(server = %server.label(), %addr, errno = ?errno, "candidate failed");
                if errno.is_some() {
                    server.last_errno = errno;
                    last_errno = errno;
                }
            }
        }
    }

    Ok(Attempt::Exhausted { errno: last_errno })
}

/// Drives `connect()` on one candidate to completion or failure.
///
/// `Err(None)` means the readiness wait expired without an OS error.
fn connect_candidate(fd: &OwnedFd, addr: &RawAddr, config: &ClientConfig) -> Result<(), Option<i32>> {
    loop {
        let err = match socket::connect(fd, addr) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        match err.raw_os_error() {
            Some(libc::EINPROGRESS | libc::EALREADY) => {
                match socket::wait_writable(fd, config.connect_timeout()) {
                    // Writable: the next connect() reports EISCONN or the real error.
                    Ok(true) => continue,
                    Ok(false) => return Err(None),
                    Err(err) => return Err(err.raw_os_error()),
                }
            }
            Some(libc::EISCONN) => return Ok(()),
            Some(libc::EINTR) => continue,
            other => return Err(other),
        }
    }
}

/// Applies per-socket options for a freshly created inet descriptor.
///
/// Option failures other than the non-blocking switch are logged and ignored.
fn tune(fd: &OwnedFd, transport: Transport, config: &ClientConfig, server: &Server) -> ConnectResult<()> {
    if transport != Transport::Udp {
        let report = |option: &str, result: io::Result<()>| {
            if let Err(err) = result {
                warn!(server = %server.label(), option, error = %err, "setsockopt failed");
            } else {
                trace!(server = %server.label(), option, "socket option applied");
            }
        };

        if let Some(timeout) = config.send_timeout() {
            report("SO_SNDTIMEO", socket::set_send_timeout(fd, timeout));
        }
        if let Some(timeout) = config.recv_timeout() {
            report("SO_RCVTIMEO", socket::set_recv_timeout(fd, timeout));
        }
        if config.behavior.no_block {
            report("SO_LINGER", socket::set_linger_zero(fd));
        }
        if config.behavior.tcp_nodelay {
            report("TCP_NODELAY", socket::set_nodelay(fd));
        }
        if config.send_buffer_size > 0 {
            report("SO_SNDBUF", socket::set_send_buffer(fd, config.send_buffer_size));
        }
        if config.recv_buffer_size > 0 {
            report("SO_RCVBUF", socket::set_recv_buffer(fd, config.recv_buffer_size));
        }
    }

    socket::set_nonblocking(fd).map_err(|err| {
        warn!(server = %server.label(), error = %err, "could not switch socket to non-blocking");
        ConnectError::ConnectionFailure
    })
}

/// `now + retry`, clamped to the latest instant the platform can represent.
fn retry_deadline(now: Instant, retry: Duration) -> Instant {
    let mut span = retry;
    loop {
        if let Some(deadline) = now.checked_add(span) {
            return deadline;
        }
        span /= 2;
    }
}

fn create_failure(server: &mut Server, err: &io::Error) -> ConnectError {
    let code = err.raw_os_error().unwrap_or(0);
    server.last_errno = Some(code);
    warn!(server = %server.label(), error = %err, "socket creation failed");
    ConnectError::SocketCreateFailure(code)
}

fn exhausted(server: &mut Server, err: &io::Error) -> Attempt {
    let errno = Some(err.raw_os_error().unwrap_or(libc::EIO));
    server.last_errno = errno;
    Attempt::Exhausted { errno }
}
