//! Accept deadlines on both server flavors.

use std::time::{Duration, Instant};

use netcore::net::{ServerOptions, TcpClient, TcpServer};
use netcore::{Accepted, ConnectMode, ConnectOptions, Connection, ListenOptions, Listener};

#[test]
fn test_tcp_server_times_out_without_blocking() {
    let mut server = TcpServer::bind_and_listen("127.0.0.1", 0, ServerOptions::default()).unwrap();

    let started = Instant::now();
    let outcome = server.accept(Some(Duration::from_millis(100))).unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.is_timed_out());
    assert!(elapsed >= Duration::from_millis(90), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "blocked for {:?}", elapsed);
}

#[test]
fn test_tcp_server_accepts_pending_peer_within_deadline() {
    let mut server = TcpServer::bind_and_listen("127.0.0.1", 0, ServerOptions::default()).unwrap();
    let port = server.local_addr().unwrap().port();

    let _client = TcpClient::connect("127.0.0.1", port).unwrap();
    let outcome = server.accept(Some(Duration::from_secs(5))).unwrap();
    assert!(matches!(outcome, Accepted::Connection(_)));
}

#[test]
fn test_listener_times_out_then_accepts() {
    let mut listener = Listener::listen("127.0.0.1:0", ListenOptions::default()).unwrap();
    let port = listener.local_addr().unwrap().port();

    assert!(listener.accept_timeout(Duration::from_millis(50)).unwrap().is_timed_out());

    let client = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
    let accepted = listener
        .accept_timeout(Duration::from_secs(5))
        .unwrap()
        .into_connection()
        .expect("pending peer should be accepted");
    assert_eq!(accepted.peer_port().unwrap(), client.local_port().unwrap());
}

#[test]
fn test_timeout_keeps_listener_usable() {
    let mut listener = Listener::listen("127.0.0.1", ListenOptions::default()).unwrap();
    for _ in 0..3 {
        assert!(listener.accept_timeout(Duration::from_millis(10)).unwrap().is_timed_out());
    }
    assert!(listener.is_bound());
}
