//! Plain TCP round trips through both the raw and the unified API.

use std::io::{Read, Write};
use std::thread;

use netcore::net::{ConnectionState, ServerOptions, TcpClient, TcpServer};
use netcore::{ConnectMode, ConnectOptions, Connection, ListenOptions, Listener, Transfer};

mod common;

#[test]
fn test_tcp_client_server_both_directions() {
    let mut server = TcpServer::bind_and_listen("127.0.0.1", 0, ServerOptions::default()).unwrap();
    let port = server.local_addr().unwrap().port();

    let client = thread::spawn(move || {
        let mut client = TcpClient::connect("127.0.0.1", port).unwrap();
        client.write_all(b"hello from client").unwrap();
        let mut reply = [0u8; 17];
        client.read_exact(&mut reply).unwrap();
        reply
    });

    let mut peer = server.accept(None).unwrap().into_connection().unwrap();
    let mut received = [0u8; 17];
    peer.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"hello from client");
    peer.write_all(b"hello from server").unwrap();

    assert_eq!(&client.join().unwrap(), b"hello from server");
}

#[test]
fn test_connection_listener_echo_preserves_order() {
    let mut listener = Listener::listen("127.0.0.1:0", ListenOptions::default()).unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = common::spawn_echo(listener, 1);

    let mut conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);
    assert!(!conn.is_secure());
    assert!(!conn.peer_verified());
    assert!(conn.peer_certificate().is_none());

    for i in 0..20 {
        let line = format!("line {}", i);
        conn.write_all(format!("{}\n", line).as_bytes()).unwrap();
        assert_eq!(conn.read_line().unwrap(), (line.clone(), line.len() + 1));
    }

    conn.close().unwrap();
    for outcome in server.join().unwrap() {
        outcome.unwrap();
    }
}

#[test]
fn test_large_payload_arrives_intact() {
    let mut listener = Listener::listen("127.0.0.1", ListenOptions::default()).unwrap();
    let port = listener.local_addr().unwrap().port();

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match conn.read(&mut buf).unwrap() {
                Transfer::Bytes(n) => received.extend_from_slice(&buf[..n]),
                Transfer::Closed => break,
                Transfer::Retry => continue,
            }
        }
        received
    });

    let mut conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
    conn.write_all(&payload).unwrap();
    conn.close().unwrap();

    assert_eq!(server.join().unwrap(), expected);
}

#[test]
fn test_peer_addresses_match() {
    let mut listener = Listener::listen("127.0.0.1:0", ListenOptions::default()).unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let conn = listener.accept().unwrap();
        (conn.local_port().unwrap(), conn.peer_port().unwrap())
    });

    let conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
    let (server_local, server_peer) = server.join().unwrap();

    assert_eq!(conn.peer_port().unwrap(), port);
    assert_eq!(server_local, port);
    assert_eq!(server_peer, conn.local_port().unwrap());
    assert_eq!(conn.peer_address().unwrap().to_string(), format!("127.0.0.1:{}", port));
}
