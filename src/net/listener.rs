//! Unified plain/TLS listener.
//!
//! # Responsibilities
//! - Resolve the listen endpoint and bind on first use
//! - Load the certificate chain and private key for `Secure` listeners
//! - Turn every accepted peer into an established [`Connection`]
//!
//! # Design Decisions
//! - The TLS context is built at `listen()` time so a bad certificate or key
//!   fails early, while the socket is bound lazily by `bind()`, `accept()`
//!   or `local_addr()`
//! - The server-side handshake runs inside `accept()`; a failed handshake is
//!   an accept failure and the peer socket is dropped
//! - The handshake runs under `handshake_timeout` socket timeouts, cleared
//!   once the session is established
//! - The listener itself has no lifecycle state beyond bound/unbound

use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rustls::ServerConnection;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};
use crate::net::connection::{ConnectMode, Connection, ConnectionId, PlainStrategy, Role, Strategy, TlsStrategy};
use crate::net::endpoint;
use crate::net::tcp::{self, Accepted, DEFAULT_BACKLOG};
use crate::observability::metrics;
use crate::tls::bootstrap;
use crate::tls::ciphers::ALL_CIPHERS;
use crate::tls::context::TlsServerContext;

/// Default deadline for a peer to complete the server handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Security mode of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenMode {
    #[default]
    Plain,
    Secure,
}

impl ListenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenMode::Plain => "plain",
            ListenMode::Secure => "secure",
        }
    }

    fn connect_mode(&self) -> ConnectMode {
        match self {
            ListenMode::Plain => ConnectMode::Plain,
            ListenMode::Secure => ConnectMode::Secure,
        }
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(ListenMode::Plain),
            "secure" => Ok(ListenMode::Secure),
            other => Err(NetError::Parameter(format!("unknown listen mode '{}'", other))),
        }
    }
}

/// Options for [`Listener::listen`].
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Accept queue length, clamped to `5..=1000`.
    pub max_connections: u32,
    pub reuse_addr: bool,
    /// Applied to every accepted connection.
    pub keepalive: bool,
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub cipher_list: Option<String>,
    pub mode: ListenMode,
    /// Read/write deadline for the server handshake. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_BACKLOG,
            reuse_addr: false,
            keepalive: true,
            certificate: None,
            private_key: None,
            cipher_list: None,
            mode: ListenMode::Plain,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }
}

/// A listening endpoint producing [`Connection`]s.
pub struct Listener {
    address: SocketAddr,
    options: ListenOptions,
    tls: Option<TlsServerContext>,
    socket: Option<TcpListener>,
}

impl Listener {
    /// Prepare a listener on `endpoint` (`host`, `host:port`, `[v6]:port`).
    ///
    /// A missing host means all IPv4 interfaces and a missing port an
    /// ephemeral one. `Secure` requires both a certificate and a key, and
    /// needs [`crate::tls::ensure_initialized`] to have run.
    pub fn listen(endpoint: &str, options: ListenOptions) -> NetResult<Self> {
        let tls = match options.mode {
            ListenMode::Plain => None,
            ListenMode::Secure => {
                let (Some(certificate), Some(private_key)) = (&options.certificate, &options.private_key) else {
                    return Err(NetError::Parameter(
                        "secure listener requires a certificate and a private key".to_string(),
                    ));
                };
                let cipher_list = options.cipher_list.as_deref().unwrap_or(ALL_CIPHERS);
                Some(TlsServerContext::new(certificate, private_key, cipher_list)?)
            }
        };

        let address = endpoint::resolve(endpoint, "0.0.0.0", None, None)?
            .into_iter()
            .next()
            .ok_or_else(|| NetError::runtime_msg("resolve", format!("no address for '{}'", endpoint)))?
            .to_socket_addr();

        tracing::debug!(address = %address, mode = %options.mode, "Listener prepared");
        Ok(Self {
            address,
            options,
            tls,
            socket: None,
        })
    }

    /// Bind and listen. Does nothing if already bound.
    pub fn bind(&mut self) -> NetResult<()> {
        self.bound().map(|_| ())
    }

    fn bound(&mut self) -> NetResult<&TcpListener> {
        if self.socket.is_none() {
            let socket = tcp::bind_listener(self.address, self.options.max_connections, self.options.reuse_addr)?;
            tracing::info!(
                address = ?socket.local_addr().ok(),
                backlog = tcp::clamp_backlog(self.options.max_connections),
                mode = %self.options.mode,
                "Listener bound"
            );
            self.socket = Some(socket);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| NetError::runtime_msg("listen", "listener is not bound"))
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    pub fn mode(&self) -> ListenMode {
        self.options.mode
    }

    /// The bound address; binds first if needed so an ephemeral port is known.
    pub fn local_addr(&mut self) -> NetResult<SocketAddr> {
        self.bound()?
            .local_addr()
            .map_err(|e| NetError::runtime("getsockname", e))
    }

    /// Block until a peer connects and return the established connection.
    pub fn accept(&mut self) -> NetResult<Connection> {
        let (stream, peer) = self
            .bound()?
            .accept()
            .map_err(|e| NetError::runtime("accept", e))?;
        self.establish(stream, peer)
    }

    /// Like [`Listener::accept`] but gives up after `timeout`.
    pub fn accept_timeout(&mut self, timeout: Duration) -> NetResult<Accepted<Connection>> {
        if !tcp::wait_readable(self.bound()?, timeout)? {
            metrics::accept_timed_out();
            return Ok(Accepted::TimedOut);
        }
        self.accept().map(Accepted::Connection)
    }

    fn establish(&self, stream: TcpStream, peer: SocketAddr) -> NetResult<Connection> {
        if self.options.keepalive {
            tcp::set_keepalive(&stream, true)?;
        }
        let id = ConnectionId::new();
        let mode = self.options.mode.connect_mode();

        let Some(tls) = &self.tls else {
            return Ok(Connection::established(id, mode, Role::Server, Box::new(PlainStrategy::new(stream)), false));
        };

        let session = ServerConnection::new(tls.config()).map_err(|e| {
            bootstrap::record_error("ServerConnection::new", &e);
            bootstrap::drain_error_log();
            NetError::runtime_msg("accept", format!("TLS session setup failed: {}", e))
        })?;
        set_socket_timeouts(&stream, self.options.handshake_timeout)?;
        let mut strategy = TlsStrategy::<ServerConnection>::new(session, stream);
        if let Err(e) = strategy.handshake() {
            bootstrap::record_io_error("handshake", &e);
            bootstrap::drain_error_log();
            metrics::handshake_failed(ListenMode::Secure.as_str());
            tracing::debug!(connection_id = %id, peer = %peer, error = %e, "TLS accept handshake failed");
            return Err(NetError::runtime("handshake", e));
        }
        set_socket_timeouts(strategy.socket(), None)?;
        Ok(Connection::established(id, mode, Role::Server, Box::new(strategy), false))
    }
}

fn set_socket_timeouts(stream: &TcpStream, timeout: Option<Duration>) -> NetResult<()> {
    stream.set_read_timeout(timeout).map_err(|e| NetError::runtime("setsockopt", e))?;
    stream.set_write_timeout(timeout).map_err(|e| NetError::runtime("setsockopt", e))
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("address", &self.address)
            .field("mode", &self.options.mode)
            .field("bound", &self.is_bound())
            .finish()
    }
}
