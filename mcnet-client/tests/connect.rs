use std::mem;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcnet_client::{
    connect, connect_at, Client, ClientConfig, ConnectError, Distribution, Server, ServerSpec,
    ServerState, Transport,
};

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mcnet-{}-{}.sock", std::process::id(), name))
}

fn breaker_config(limit: u32, retry_secs: u64) -> ClientConfig {
    ClientConfig {
        retry_timeout_secs: retry_secs,
        server_failure_limit: limit,
        ..ClientConfig::default()
    }
}

fn getsockopt_int(fd: i32, level: i32, name: i32) -> i32 {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd, level, name, &mut value as *mut _ as *mut libc::c_void, &mut len)
    };
    assert_eq!(rc, 0);
    value
}

#[test]
fn tcp_connects_to_local_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let mut server = Server::new(ServerSpec::tcp("127.0.0.1", port));

    connect(&mut server, &ClientConfig::default()).expect("connect");
    assert!(server.is_connected());
    assert_eq!(server.failure_count(), 0);

    let fd = server.raw_fd().expect("fd");
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    assert_ne!(flags & libc::O_NONBLOCK, 0);

    server.close();
    assert!(!server.is_connected());
}

#[test]
fn success_resets_failure_counter() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut server = Server::new(ServerSpec::tcp("127.0.0.1", addr.port()));
    let config = ClientConfig::default();
    for _ in 0..3 {
        assert!(connect(&mut server, &config).is_err());
    }
    assert_eq!(server.failure_count(), 3);

    let _listener = TcpListener::bind(addr).expect("rebind");
    connect(&mut server, &config).expect("connect");
    assert_eq!(server.failure_count(), 0);
}

#[test]
fn breaker_marks_server_dead_after_limit() {
    let limit = 2;
    let retry = Duration::from_secs(10);
    let config = breaker_config(limit, retry.as_secs());
    let mut server = Server::new(ServerSpec::tcp("127.0.0.1", closed_port()));

    // Space failures past the retry window so each one reaches the socket.
    let t0 = Instant::now();
    let mut now = t0;
    for _ in 0..limit {
        let err = connect_at(&mut server, &config, now).unwrap_err();
        assert!(matches!(err, ConnectError::Errno(_)));
        now += retry + Duration::from_secs(1);
    }
    assert_eq!(server.failure_count(), limit);

    // The (L+1)-th call arms the breaker and short-circuits.
    let armed_at = now;
    assert_eq!(
        connect_at(&mut server, &config, armed_at),
        Err(ConnectError::ServerMarkedDead)
    );
    assert_eq!(server.failure_count(), 0);
    assert_eq!(server.state_at(&config, armed_at), ServerState::Dead);

    // Still dead anywhere inside the window; no socket work happens.
    let errno_before = server.last_errno();
    for offset in [1, 5, 9] {
        let at = armed_at + Duration::from_secs(offset);
        assert_eq!(connect_at(&mut server, &config, at), Err(ConnectError::ServerMarkedDead));
    }
    assert_eq!(server.last_errno(), errno_before);
    assert_eq!(server.failure_count(), 0);

    // Once the window has passed, a real attempt is made again.
    let after = armed_at + retry;
    let err = connect_at(&mut server, &config, after).unwrap_err();
    assert!(matches!(err, ConnectError::Errno(_)));
    assert_eq!(server.failure_count(), 1);
}

#[test]
fn breaker_disabled_without_failure_limit() {
    let config = breaker_config(0, 30);
    let mut server = Server::new(ServerSpec::tcp("127.0.0.1", closed_port()));
    let now = Instant::now();
    for _ in 0..4 {
        let err = connect_at(&mut server, &config, now).unwrap_err();
        assert_ne!(err, ConnectError::ServerMarkedDead);
    }
    assert_eq!(server.failure_count(), 4);
}

#[test]
fn unix_socket_missing_path_is_errno() {
    let path = socket_path("missing");
    let _ = std::fs::remove_file(&path);
    let mut server = Server::new(ServerSpec::unix(path.to_string_lossy()));

    let err = connect(&mut server, &ClientConfig::default()).unwrap_err();
    assert_eq!(err, ConnectError::Errno(libc::ENOENT));
    assert_eq!(server.last_errno(), Some(libc::ENOENT));
    assert_eq!(server.failure_count(), 1);
}

#[test]
fn unix_socket_connects_to_listener() {
    let path = socket_path("live");
    let _ = std::fs::remove_file(&path);
    let _listener = UnixListener::bind(&path).expect("bind unix");

    let mut server = Server::new(ServerSpec::unix(path.to_string_lossy()));
    connect(&mut server, &ClientConfig::default()).expect("connect");
    assert!(server.is_connected());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn host_lookup_failure_creates_no_socket() {
    let mut server = Server::new(ServerSpec::tcp("no-such-host.invalid", 11211));
    let err = connect(&mut server, &ClientConfig::default()).unwrap_err();
    assert!(matches!(err, ConnectError::HostLookupFailure { .. }));
    assert!(!server.is_connected());
    assert!(server.cached_addresses().is_empty());
    assert_eq!(server.failure_count(), 0);
}

#[test]
fn unroutable_address_times_out_or_reports_errno() {
    let config = ClientConfig {
        connect_timeout_ms: 50,
        ..ClientConfig::default()
    };
    // TEST-NET-1: reserved for documentation, never routed.
    let mut server = Server::new(ServerSpec::tcp("192.0.2.1", 11211));

    let started = Instant::now();
    let err = match connect(&mut server, &config) {
        Ok(()) => {
            eprintln!("192.0.2.1 accepted a connection; network intercepts TEST-NET, skipping");
            return;
        }
        Err(err) => err,
    };
    assert!(
        matches!(err, ConnectError::Timeout | ConnectError::Errno(_)),
        "unexpected {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.failure_count(), 1);
}

#[test]
fn socket_options_follow_behavior_flags() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let mut config = ClientConfig::default();
    config.behavior.tcp_nodelay = true;
    config.behavior.no_block = true;
    config.send_buffer_size = 64 * 1024;
    config.recv_timeout_us = 250_000;

    let mut server = Server::new(ServerSpec::tcp("127.0.0.1", port));
    connect(&mut server, &config).expect("connect");
    let fd = server.raw_fd().expect("fd");

    assert_ne!(getsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY), 0);

    let mut linger = libc::linger { l_onoff: 0, l_linger: 0 };
    let mut len = mem::size_of::<libc::linger>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &mut linger as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    assert_eq!(rc, 0);
    assert_ne!(linger.l_onoff, 0);
    assert_eq!(linger.l_linger, 0);
}

#[test]
fn udp_connects_without_handshake() {
    let mut server = Server::new(ServerSpec::udp("127.0.0.1", closed_port()));
    connect(&mut server, &ClientConfig::default()).expect("udp connect");
    assert_eq!(server.transport(), Transport::Udp);
    assert!(server.is_connected());
}

#[derive(Default)]
struct CountingDistribution {
    calls: AtomicUsize,
}

impl Distribution for CountingDistribution {
    fn redistribute(&self, _client: &Client) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn dead_server_triggers_redistribution_when_ejecting() {
    let distribution = Arc::new(CountingDistribution::default());
    let mut config = breaker_config(1, 60);
    config.behavior.auto_eject_hosts = true;

    let mut client = Client::builder(config)
        .server(ServerSpec::tcp("127.0.0.1", closed_port()))
        .distribution(distribution.clone())
        .build();

    let now = Instant::now();
    let first = client.connect_at(0, now).unwrap_err();
    assert!(matches!(first.error, ConnectError::Errno(_)));
    assert_eq!(distribution.calls.load(Ordering::SeqCst), 0);

    let second = client.connect_at(0, now).unwrap_err();
    assert_eq!(second.error, ConnectError::ServerMarkedDead);
    assert_eq!(second.index, 0);
    assert!(second.label.starts_with("127.0.0.1:"));
    assert_eq!(distribution.calls.load(Ordering::SeqCst), 1);
    assert!(client.live_servers(now).is_empty());
}

#[test]
fn dead_server_skips_redistribution_without_eject() {
    let distribution = Arc::new(CountingDistribution::default());
    let mut client = Client::builder(breaker_config(1, 60))
        .server(ServerSpec::tcp("127.0.0.1", closed_port()))
        .distribution(distribution.clone())
        .build();

    let now = Instant::now();
    let _ = client.connect_at(0, now);
    let err = client.connect_at(0, now).unwrap_err();
    assert_eq!(err.error, ConnectError::ServerMarkedDead);
    assert_eq!(distribution.calls.load(Ordering::SeqCst), 0);
}
