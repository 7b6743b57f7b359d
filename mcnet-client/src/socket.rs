//! # Socket Primitives
//!
//! Thin safe wrappers over the `libc` socket calls the connect path needs:
//! creation, option setting, non-blocking mode, `connect()`, the bounded
//! write-readiness wait, and pending-error retrieval.
//!
//! Every helper returns `io::Result` carrying the raw OS error so callers can
//! classify `EINPROGRESS`, `EINTR` and friends themselves.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{c_int, c_void, socklen_t};

/// Raw socket address plus its length, ready for `connect()`.
pub(crate) struct RawAddr {
    storage: libc::sockaddr_storage,
    len: socklen_t,
}

impl RawAddr {
    /// Encodes an IPv4 or IPv6 socket address.
    pub(crate) fn from_inet(addr: &SocketAddr) -> Self {
        // SAFETY: sockaddr_storage is plain old data; all-zero is valid.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(v4) => {
                // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in.
                let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in6.
                let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                sin6.sin6_scope_id = v6.scope_id();
                mem::size_of::<libc::sockaddr_in6>()
            }
        };
        RawAddr {
            storage,
            len: len as socklen_t,
        }
    }

    /// Encodes a local-domain socket path.
    ///
    /// Fails with `ENAMETOOLONG` when the path does not fit `sun_path`.
    pub(crate) fn from_unix_path(path: &str) -> io::Result<Self> {
        // SAFETY: sockaddr_storage is plain old data; all-zero is valid.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_un.
        let sun = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_un) };
        let bytes = path.as_bytes();
        // Keep one byte for the trailing NUL.
        if bytes.len() >= sun.sun_path.len() {
            return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }
        sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(RawAddr {
            storage,
            len: mem::size_of::<libc::sockaddr_un>() as socklen_t,
        })
    }
}

/// Kind of socket to open for an inet candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketKind {
    Stream,
    Datagram,
}

/// Opens a socket for the address family of `addr`.
pub(crate) fn open_inet(addr: &SocketAddr, kind: SocketKind) -> io::Result<OwnedFd> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    let (ty, protocol) = match kind {
        SocketKind::Stream => (libc::SOCK_STREAM, libc::IPPROTO_TCP),
        SocketKind::Datagram => (libc::SOCK_DGRAM, libc::IPPROTO_UDP),
    };
    open(domain, ty, protocol)
}

/// Opens a local-domain stream socket.
pub(crate) fn open_unix_stream() -> io::Result<OwnedFd> {
    open(libc::AF_UNIX, libc::SOCK_STREAM, 0)
}

/// Creates a close-on-exec socket so descriptors never leak into children.
fn open(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let ty = ty | libc::SOCK_CLOEXEC;

    // SAFETY: plain syscall; the result is checked before use.
    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let raw = fd.as_raw_fd();
        // SAFETY: F_SETFD with an int flag word on a live descriptor.
        retry_interrupted(|| unsafe { libc::fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }

    Ok(fd)
}

/// Issues one `connect()` call.
pub(crate) fn connect(fd: &OwnedFd, addr: &RawAddr) -> io::Result<()> {
    // SAFETY: `addr.storage` is initialized for at least `addr.len` bytes.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr.storage as *const _ as *const libc::sockaddr,
            addr.len,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Waits up to `timeout` for `fd` to become writable.
///
/// Returns `Ok(true)` when writable, `Ok(false)` when the wait expired, and
/// the socket's pending error (or the `poll` error) otherwise.
pub(crate) fn wait_writable(fd: &OwnedFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    let millis = timeout.as_millis().min(c_int::MAX as u128) as c_int;
    // SAFETY: `pfd` is a valid pollfd array of length 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if pfd.revents & libc::POLLERR != 0 {
        let fallback = io::Error::last_os_error();
        return Err(take_error(fd)?.unwrap_or(fallback));
    }
    Ok(rc == 1)
}

/// Reads and clears `SO_ERROR`.
pub(crate) fn take_error(fd: &OwnedFd) -> io::Result<Option<io::Error>> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    // SAFETY: `value` and `len` describe a writable c_int.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut value as *mut _ as *mut c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((value != 0).then(|| io::Error::from_raw_os_error(value)))
}

fn setsockopt<T>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` points to a live T of exactly the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

pub(crate) fn set_send_timeout(fd: &OwnedFd, timeout: Duration) -> io::Result<()> {
    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_SNDTIMEO, &timeval(timeout))
}

pub(crate) fn set_recv_timeout(fd: &OwnedFd, timeout: Duration) -> io::Result<()> {
    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeval(timeout))
}

pub(crate) fn set_send_buffer(fd: &OwnedFd, bytes: u32) -> io::Result<()> {
    let size = bytes.min(c_int::MAX as u32) as c_int;
    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_SNDBUF, &size)
}

pub(crate) fn set_recv_buffer(fd: &OwnedFd, bytes: u32) -> io::Result<()> {
    let size = bytes.min(c_int::MAX as u32) as c_int;
    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_RCVBUF, &size)
}

/// Abortive close: `close()` drops the connection with a RST.
pub(crate) fn set_linger_zero(fd: &OwnedFd) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_LINGER, &linger)
}

pub(crate) fn set_nodelay(fd: &OwnedFd) -> io::Result<()> {
    let on: c_int = 1;
    setsockopt(fd.as_raw_fd(), libc::IPPROTO_TCP, libc::TCP_NODELAY, &on)
}

/// Forces `O_NONBLOCK`, retrying both `fcntl` calls on `EINTR`/`EAGAIN`.
pub(crate) fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: F_GETFL takes no argument beyond the descriptor.
    let flags = retry_interrupted(|| unsafe { libc::fcntl(raw, libc::F_GETFL, 0) })?;
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: F_SETFL with an int flag word.
    retry_interrupted(|| unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

fn retry_interrupted(mut call: impl FnMut() -> c_int) -> io::Result<c_int> {
    loop {
        let rc = call();
        if rc != -1 {
            return Ok(rc);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
            _ => return Err(err),
        }
    }
}
