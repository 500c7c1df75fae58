//! Unified plain/TLS connection.
//!
//! # Responsibilities
//! - Connect in `Plain`, `Secure` or `AlwaysSecure` mode
//! - Expose one read/write/close contract regardless of mode
//! - Track connection state and a unique ID for log correlation
//!
//! # Design Decisions
//! - The mode is resolved once into a strategy object (plain socket or TLS
//!   stream); I/O calls never branch on the mode again
//! - A "retry" condition is reported as [`Transfer::Retry`], a clean peer
//!   close as [`Transfer::Closed`]; neither closes the connection
//! - Closing releases the TLS session and the socket without `shutdown(2)`
//!   or a close_notify, so descriptors inherited across `fork()` stay usable
//! - `Secure` logs an unverifiable peer certificate and carries on;
//!   `AlwaysSecure` fails the handshake

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, CommonState, ServerConnection, StreamOwned};
use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};
use crate::net::address::Address;
use crate::net::tcp;
use crate::observability::metrics;
use crate::tls::bootstrap;
use crate::tls::ciphers::{ALL_CIPHERS, HARDENED_CIPHERS};
use crate::tls::context::{TlsClientContext, DEFAULT_TRUST_STORE, DEFAULT_VERIFY_DEPTH};

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle.
///
/// `Unconnected → Connecting → (TlsHandshaking) → Established → Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    TlsHandshaking,
    Established,
    Closed,
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Security mode of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectMode {
    #[default]
    Plain,
    /// Encrypt, but accept a peer certificate that fails verification.
    Secure,
    /// Encrypt and require a verified peer certificate.
    AlwaysSecure,
}

impl ConnectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectMode::Plain => "plain",
            ConnectMode::Secure => "secure",
            ConnectMode::AlwaysSecure => "always-secure",
        }
    }

    pub fn is_secure(&self) -> bool {
        !matches!(self, ConnectMode::Plain)
    }
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "plain" => Ok(ConnectMode::Plain),
            "secure" => Ok(ConnectMode::Secure),
            "always-secure" | "alwayssecure" => Ok(ConnectMode::AlwaysSecure),
            other => Err(NetError::Parameter(format!("unknown connection mode '{}'", other))),
        }
    }
}

/// Client connection options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Cipher list expression; defaults depend on the mode.
    pub cipher_list: Option<String>,
    /// Directory of PEM trust anchors, or a single PEM bundle.
    pub trust_store: PathBuf,
    pub verify_depth: u32,
    /// Name sent as SNI and verified against the certificate; defaults to
    /// the connect address.
    pub sni_host: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub keepalive: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            cipher_list: None,
            trust_store: PathBuf::from(DEFAULT_TRUST_STORE),
            verify_depth: DEFAULT_VERIFY_DEPTH,
            sni_host: None,
            connect_timeout: None,
            keepalive: false,
        }
    }
}

/// Result of a single read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// This many bytes were transferred.
    Bytes(usize),
    /// The peer closed the stream.
    Closed,
    /// Nothing transferred yet; try again.
    Retry,
}

/// The I/O strategy chosen at connect/accept time.
pub(crate) trait Strategy: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn flush(&mut self) -> io::Result<()>;
    fn socket(&self) -> &TcpStream;
    /// TLS session state, `None` for plain sockets.
    fn tls_state(&self) -> Option<&CommonState>;
}

pub(crate) struct PlainStrategy {
    stream: TcpStream,
}

impl PlainStrategy {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Strategy for PlainStrategy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn socket(&self) -> &TcpStream {
        &self.stream
    }

    fn tls_state(&self) -> Option<&CommonState> {
        None
    }
}

pub(crate) struct TlsStrategy<C> {
    stream: StreamOwned<C, TcpStream>,
}

macro_rules! tls_strategy {
    ($session:ty) => {
        impl TlsStrategy<$session> {
            pub(crate) fn new(session: $session, socket: TcpStream) -> Self {
                Self {
                    stream: StreamOwned::new(session, socket),
                }
            }

            /// Drive the handshake to completion and flush what it queued.
            pub(crate) fn handshake(&mut self) -> io::Result<()> {
                while self.stream.conn.is_handshaking() {
                    self.stream.conn.complete_io(&mut self.stream.sock)?;
                }
                while self.stream.conn.wants_write() {
                    self.stream.conn.complete_io(&mut self.stream.sock)?;
                }
                Ok(())
            }
        }

        impl Strategy for TlsStrategy<$session> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.stream.read(buf)
            }

            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.stream.write(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                self.stream.flush()
            }

            fn socket(&self) -> &TcpStream {
                &self.stream.sock
            }

            fn tls_state(&self) -> Option<&CommonState> {
                let state: &CommonState = &self.stream.conn;
                Some(state)
            }
        }
    };
}

tls_strategy!(ClientConnection);
tls_strategy!(ServerConnection);

/// A single logical connection, plain or TLS.
///
/// Not safe for concurrent use from several threads; callers serialize.
pub struct Connection {
    id: ConnectionId,
    mode: ConnectMode,
    role: Role,
    state: ConnectionState,
    peer_verified: bool,
    strategy: Option<Box<dyn Strategy>>,
}

impl Connection {
    /// Connect to `address:port` in the given mode.
    ///
    /// Secure modes require [`crate::tls::ensure_initialized`] to have run.
    pub fn connect(address: &str, port: u16, mode: ConnectMode, options: &ConnectOptions) -> NetResult<Self> {
        if address.is_empty() {
            return Err(NetError::Parameter("empty address".to_string()));
        }
        if port == 0 {
            return Err(NetError::Parameter("port 0 cannot be connected".to_string()));
        }

        let id = ConnectionId::new();
        let span = tracing::debug_span!("connect", connection_id = %id, peer = address, port, mode = %mode);
        let _guard = span.enter();
        tracing::trace!(state = ?ConnectionState::Connecting, "Connecting");

        match mode {
            ConnectMode::Plain => {
                let stream = dial(address, port, options)?;
                Ok(Self::established(id, mode, Role::Client, Box::new(PlainStrategy::new(stream)), false))
            }
            ConnectMode::Secure | ConnectMode::AlwaysSecure => Self::connect_tls(id, address, port, mode, options),
        }
    }

    fn connect_tls(
        id: ConnectionId,
        address: &str,
        port: u16,
        mode: ConnectMode,
        options: &ConnectOptions,
    ) -> NetResult<Self> {
        let enforce = mode == ConnectMode::AlwaysSecure;
        let default_ciphers = if enforce { HARDENED_CIPHERS } else { ALL_CIPHERS };
        let cipher_list = options.cipher_list.as_deref().unwrap_or(default_ciphers);
        let context = TlsClientContext::new(cipher_list, &options.trust_store, options.verify_depth, enforce)?;

        let host = options.sni_host.as_deref().unwrap_or(address);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| NetError::Initialization(format!("invalid TLS server name '{}': {}", host, e)))?;

        let stream = dial(address, port, options)?;
        let session = ClientConnection::new(context.config(), server_name).map_err(|e| {
            bootstrap::record_error("ClientConnection::new", &e);
            bootstrap::drain_error_log();
            NetError::Initialization(format!("TLS session setup failed: {}", e))
        })?;

        let mut strategy = TlsStrategy::<ClientConnection>::new(session, stream);
        tracing::trace!(state = ?ConnectionState::TlsHandshaking, "Starting TLS handshake");
        if let Err(e) = strategy.handshake() {
            bootstrap::record_io_error("handshake", &e);
            bootstrap::drain_error_log();
            metrics::handshake_failed(mode.as_str());
            return Err(NetError::Initialization(format!(
                "TLS handshake with {}:{} failed: {}",
                address, port, e
            )));
        }

        let has_certificate = strategy
            .tls_state()
            .and_then(|state| state.peer_certificates())
            .is_some_and(|chain| !chain.is_empty());
        if !has_certificate {
            metrics::handshake_failed(mode.as_str());
            return Err(NetError::Initialization(format!(
                "{}:{} presented no certificate",
                address, port
            )));
        }

        let peer_verified = match context.verifier().failure() {
            None => true,
            Some(reason) => {
                bootstrap::drain_error_log();
                tracing::warn!(
                    peer = address,
                    port,
                    reason = %reason,
                    "Peer certificate verification failed; continuing with unverified encryption"
                );
                false
            }
        };

        Ok(Self::established(id, mode, Role::Client, Box::new(strategy), peer_verified))
    }

    pub(crate) fn established(
        id: ConnectionId,
        mode: ConnectMode,
        role: Role,
        strategy: Box<dyn Strategy>,
        peer_verified: bool,
    ) -> Self {
        let conn = Self {
            id,
            mode,
            role,
            state: ConnectionState::Established,
            peer_verified,
            strategy: Some(strategy),
        };
        tracing::debug!(
            connection_id = %conn.id,
            role = conn.role.as_str(),
            mode = %conn.mode,
            peer = ?conn.socket().and_then(|s| s.peer_addr().ok()),
            protocol = ?conn.protocol_version(),
            cipher = ?conn.cipher_suite(),
            "Connection established"
        );
        metrics::connection_opened(role.as_str(), mode.as_str());
        conn
    }

    fn strategy(&mut self) -> NetResult<&mut Box<dyn Strategy>> {
        self.strategy.as_mut().ok_or(NetError::NotConnected)
    }

    fn socket(&self) -> Option<&TcpStream> {
        self.strategy.as_ref().map(|s| s.socket())
    }

    fn connected_socket(&self) -> NetResult<&TcpStream> {
        self.socket().ok_or(NetError::NotConnected)
    }

    /// Read into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> NetResult<Transfer> {
        let secure = self.mode.is_secure();
        let id = self.id;
        let strategy = self.strategy()?;
        if buf.is_empty() {
            return Ok(Transfer::Bytes(0));
        }
        match strategy.read(buf) {
            Ok(0) => Ok(Transfer::Closed),
            Ok(n) => {
                metrics::bytes_read(n);
                Ok(Transfer::Bytes(n))
            }
            Err(e) if is_retry(&e) => Ok(Transfer::Retry),
            Err(e) if secure && e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!(connection_id = %id, "Peer closed without close_notify");
                Ok(Transfer::Closed)
            }
            Err(e) => {
                if secure {
                    bootstrap::record_io_error("read", &e);
                    bootstrap::drain_error_log();
                }
                Err(NetError::runtime("read", e))
            }
        }
    }

    /// Write from `buf` and try to flush buffered output before returning.
    ///
    /// [`Transfer::Retry`] means nothing from `buf` was taken. Once bytes
    /// are accepted they are reported even if the flush could not finish.
    pub fn write(&mut self, buf: &[u8]) -> NetResult<Transfer> {
        let secure = self.mode.is_secure();
        let strategy = self.strategy()?;
        let written = match strategy.write(buf) {
            Ok(n) => n,
            Err(e) if is_retry(&e) => return Ok(Transfer::Retry),
            Err(e) => {
                if secure {
                    bootstrap::record_io_error("write", &e);
                    bootstrap::drain_error_log();
                }
                return Err(NetError::runtime("write", e));
            }
        };
        match strategy.flush() {
            Ok(()) => {}
            // Accepted bytes stay in the session buffer and leave with the
            // next write or flush.
            Err(e) if is_retry(&e) && written > 0 => {
                tracing::trace!(bytes = written, "Output buffered, flush pending");
            }
            Err(e) if is_retry(&e) => return Ok(Transfer::Retry),
            Err(e) => {
                if secure {
                    bootstrap::record_io_error("flush", &e);
                    bootstrap::drain_error_log();
                }
                return Err(NetError::runtime("flush", e));
            }
        }
        metrics::bytes_written(written);
        Ok(Transfer::Bytes(written))
    }

    /// Read one line; see [`crate::net::TcpClient::read_line`].
    pub fn read_line(&mut self) -> NetResult<(String, usize)> {
        tcp::read_line_with(|byte| match self.read(byte)? {
            Transfer::Bytes(n) => Ok(n),
            Transfer::Closed => Ok(0),
            Transfer::Retry => Err(NetError::runtime("read", io::ErrorKind::WouldBlock.into())),
        })
    }

    /// Release the TLS session and the socket.
    ///
    /// Later calls on this connection fail with [`NetError::NotConnected`].
    pub fn close(&mut self) -> NetResult<()> {
        let strategy = self.strategy.take().ok_or(NetError::NotConnected)?;
        drop(strategy);
        self.state = ConnectionState::Closed;
        metrics::connection_closed();
        tracing::debug!(connection_id = %self.id, "Connection closed");
        Ok(())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_secure(&self) -> bool {
        self.strategy.as_ref().is_some_and(|s| s.tls_state().is_some())
    }

    /// Whether the peer certificate chain verified against the trust store.
    /// Always `false` for plain connections and server-side connections.
    pub fn peer_verified(&self) -> bool {
        self.peer_verified
    }

    /// DER encoding of the peer's leaf certificate.
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        let state = self.strategy.as_ref()?.tls_state()?;
        state.peer_certificates()?.first().map(|cert| cert.as_ref().to_vec())
    }

    pub fn cipher_suite(&self) -> Option<String> {
        let state = self.strategy.as_ref()?.tls_state()?;
        state.negotiated_cipher_suite().map(|suite| crate::tls::ciphers::suite_name(&suite))
    }

    pub fn protocol_version(&self) -> Option<String> {
        let state = self.strategy.as_ref()?.tls_state()?;
        state.protocol_version().map(|version| format!("{:?}", version))
    }

    pub fn local_address(&self) -> NetResult<Address> {
        self.connected_socket()?
            .local_addr()
            .map(Address::from)
            .map_err(|e| NetError::runtime("getsockname", e))
    }

    pub fn peer_address(&self) -> NetResult<Address> {
        self.connected_socket()?
            .peer_addr()
            .map(Address::from)
            .map_err(|e| NetError::runtime("getpeername", e))
    }

    pub fn local_port(&self) -> NetResult<u16> {
        self.local_address().map(|a| a.port())
    }

    pub fn peer_port(&self) -> NetResult<u16> {
        self.peer_address().map(|a| a.port())
    }

    pub fn set_keepalive(&self, enabled: bool) -> NetResult<()> {
        tcp::set_keepalive(self.connected_socket()?, enabled)
    }

    pub fn keepalive(&self) -> NetResult<bool> {
        tcp::keepalive(self.connected_socket()?)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> NetResult<()> {
        self.connected_socket()?
            .set_read_timeout(timeout)
            .map_err(|e| NetError::runtime("setsockopt", e))
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> NetResult<()> {
        self.connected_socket()?
            .set_write_timeout(timeout)
            .map_err(|e| NetError::runtime("setsockopt", e))
    }
}

fn dial(address: &str, port: u16, options: &ConnectOptions) -> NetResult<TcpStream> {
    let stream = tcp::dial(address, port, options.connect_timeout)
        .map_err(|e| NetError::Initialization(format!("cannot connect to {}:{}: {}", address, port, e)))?;
    if options.keepalive {
        tcp::set_keepalive(&stream, true)?;
    }
    Ok(stream)
}

fn is_retry(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Connection::read(self, buf)? {
            Transfer::Bytes(n) => Ok(n),
            Transfer::Closed => Ok(0),
            Transfer::Retry => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match Connection::write(self, buf)? {
            Transfer::Bytes(n) => Ok(n),
            Transfer::Closed => Ok(0),
            Transfer::Retry => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.strategy()?.flush()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("peer", &self.socket().and_then(|s| s.peer_addr().ok()))
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.strategy.take().is_some() {
            metrics::connection_closed();
            tracing::trace!(connection_id = %self.id, "Connection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("plain".parse::<ConnectMode>().unwrap(), ConnectMode::Plain);
        assert_eq!("Secure".parse::<ConnectMode>().unwrap(), ConnectMode::Secure);
        assert_eq!("always_secure".parse::<ConnectMode>().unwrap(), ConnectMode::AlwaysSecure);
        assert!("tls".parse::<ConnectMode>().is_err());
        assert!(ConnectMode::AlwaysSecure.is_secure());
        assert!(!ConnectMode::Plain.is_secure());
    }

    #[test]
    fn test_connect_rejects_bad_parameters() {
        let options = ConnectOptions::default();
        let err = Connection::connect("", 80, ConnectMode::Plain, &options).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parameter);
        let err = Connection::connect("127.0.0.1", 0, ConnectMode::Secure, &options).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parameter);
    }

    #[test]
    fn test_plain_connect_failure_is_initialization_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Initialization);
    }

    #[test]
    fn test_closed_connection_reports_not_connected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Established);
        assert!(!conn.is_secure());
        assert_eq!(conn.peer_port().unwrap(), port);

        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        let mut buf = [0u8; 4];
        assert!(matches!(conn.read(&mut buf), Err(NetError::NotConnected)));
        assert!(matches!(conn.write(b"x"), Err(NetError::NotConnected)));
        assert!(matches!(conn.close(), Err(NetError::NotConnected)));
        assert!(conn.peer_address().is_err());
    }

    #[test]
    fn test_read_timeout_is_retry() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
        let (_peer, _) = listener.accept().unwrap();
        conn.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap(), Transfer::Retry);
        assert_eq!(conn.state(), ConnectionState::Established);
    }

    #[test]
    fn test_peer_close_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = Connection::connect("127.0.0.1", port, ConnectMode::Plain, &ConnectOptions::default()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap(), Transfer::Closed);
    }
}
