//! Minimal blocking TCP client and server.
//!
//! # Responsibilities
//! - Connect-once client with pass-through read/write
//! - Bind/listen/accept server with a clamped backlog
//! - Optional accept timeout via `poll(2)`
//!
//! # Design Decisions
//! - Dropping a socket closes it exactly once and never calls `shutdown(2)`,
//!   so a forked child can keep using an inherited descriptor
//! - A failed connect/bind/listen leaves no descriptor behind
//! - No implicit retry on read/write

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use socket2::{Domain, SockRef, Socket, Type};

use crate::error::{NetError, NetResult};
use crate::observability::metrics;

pub const DEFAULT_BACKLOG: u32 = 50;
pub const MIN_BACKLOG: u32 = 5;
pub const MAX_BACKLOG: u32 = 1000;

/// Outcome of an accept with an optional deadline.
#[derive(Debug)]
pub enum Accepted<T> {
    Connection(T),
    /// No peer arrived before the deadline.
    TimedOut,
}

impl<T> Accepted<T> {
    pub fn into_connection(self) -> Option<T> {
        match self {
            Accepted::Connection(conn) => Some(conn),
            Accepted::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Accepted::TimedOut)
    }
}

/// Resolve `address:port` for a stream socket and connect to the first
/// address that accepts.
pub(crate) fn dial(address: &str, port: u16, timeout: Option<Duration>) -> NetResult<TcpStream> {
    let candidates: Vec<SocketAddr> = (address, port)
        .to_socket_addrs()
        .map_err(|e| NetError::runtime("resolve", e))?
        .collect();

    let mut last_error = NetError::runtime_msg("resolve", format!("no address for '{}'", address));
    for candidate in candidates {
        let socket = match Socket::new(Domain::for_address(candidate), Type::STREAM, Some(socket2::Protocol::TCP)) {
            Ok(socket) => socket,
            Err(e) => {
                last_error = NetError::runtime("socket", e);
                continue;
            }
        };
        let connected = match timeout {
            Some(timeout) => socket.connect_timeout(&candidate.into(), timeout),
            None => socket.connect(&candidate.into()),
        };
        match connected {
            Ok(()) => return Ok(TcpStream::from(socket)),
            Err(e) => {
                tracing::debug!(peer = %candidate, error = %e, "Connect attempt failed");
                last_error = NetError::runtime("connect", e);
            }
        }
    }
    Err(last_error)
}

/// Create, bind and listen on `addr`. The socket is closed on any failure.
pub(crate) fn bind_listener(addr: SocketAddr, backlog: u32, reuse_addr: bool) -> NetResult<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(|e| NetError::runtime("socket", e))?;
    if reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| NetError::runtime("setsockopt", e))?;
    }
    socket
        .bind(&addr.into())
        .map_err(|e| NetError::runtime("bind", e))?;
    socket
        .listen(clamp_backlog(backlog) as i32)
        .map_err(|e| NetError::runtime("listen", e))?;
    Ok(TcpListener::from(socket))
}

pub(crate) fn clamp_backlog(backlog: u32) -> u32 {
    backlog.clamp(MIN_BACKLOG, MAX_BACKLOG)
}

/// Wait up to `timeout` for the listener to become readable.
pub(crate) fn wait_readable(listener: &TcpListener, timeout: Duration) -> NetResult<bool> {
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
    let mut fds = [PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
    let ready = nix::poll::poll(&mut fds, timeout).map_err(|errno| NetError::runtime("poll", errno.into()))?;
    Ok(ready > 0)
}

pub(crate) fn set_keepalive(stream: &TcpStream, enabled: bool) -> NetResult<()> {
    SockRef::from(stream)
        .set_keepalive(enabled)
        .map_err(|e| NetError::runtime("setsockopt", e))
}

pub(crate) fn keepalive(stream: &TcpStream) -> NetResult<bool> {
    SockRef::from(stream)
        .keepalive()
        .map_err(|e| NetError::runtime("getsockopt", e))
}

/// Read one line byte by byte with `read_byte`.
///
/// The `\n` is consumed but not returned; the count includes it. An error is
/// returned only if nothing was read before the failure.
pub(crate) fn read_line_with<F>(mut read_byte: F) -> NetResult<(String, usize)>
where
    F: FnMut(&mut [u8; 1]) -> NetResult<usize>,
{
    let mut line = Vec::new();
    let mut count = 0usize;
    let mut byte = [0u8; 1];
    loop {
        match read_byte(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                count += 1;
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(e) if count == 0 => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, bytes = count, "Read failed mid-line");
                break;
            }
        }
    }
    Ok((String::from_utf8_lossy(&line).into_owned(), count))
}

/// A connected plain TCP socket.
#[derive(Debug)]
pub struct TcpClient {
    stream: TcpStream,
}

impl TcpClient {
    /// Connect to `address:port`.
    ///
    /// An empty address or port `0` is rejected before any I/O.
    pub fn connect(address: &str, port: u16) -> NetResult<Self> {
        Self::connect_timeout(address, port, None)
    }

    pub fn connect_timeout(address: &str, port: u16, timeout: Option<Duration>) -> NetResult<Self> {
        if address.is_empty() {
            return Err(NetError::Parameter("empty address".to_string()));
        }
        if port == 0 {
            return Err(NetError::Parameter("port 0 cannot be connected".to_string()));
        }
        let stream = dial(address, port, timeout)?;
        tracing::debug!(
            peer = ?stream.peer_addr().ok(),
            "TCP client connected"
        );
        metrics::connection_opened("client", "plain");
        Ok(Self { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> NetResult<usize> {
        self.stream.read(buf).map_err(|e| NetError::runtime("read", e))
    }

    pub fn write(&mut self, buf: &[u8]) -> NetResult<usize> {
        self.stream.write(buf).map_err(|e| NetError::runtime("write", e))
    }

    pub fn read_line(&mut self) -> NetResult<(String, usize)> {
        read_line_with(|byte| self.read(byte))
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        self.stream.local_addr().map_err(|e| NetError::runtime("getsockname", e))
    }

    pub fn peer_addr(&self) -> NetResult<SocketAddr> {
        self.stream.peer_addr().map_err(|e| NetError::runtime("getpeername", e))
    }

    pub fn keepalive(&self) -> NetResult<bool> {
        keepalive(&self.stream)
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl Read for TcpClient {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for TcpClient {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Options for [`TcpServer::bind_and_listen`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Accept queue length, clamped to `5..=1000`.
    pub backlog: u32,
    pub reuse_addr: bool,
    /// Keep the accepted connection inside the server and close it before
    /// the next accept. Use [`TcpServer::accept_retained`] in this mode.
    pub auto_close_previous: bool,
    pub keepalive: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            reuse_addr: false,
            auto_close_previous: false,
            keepalive: true,
        }
    }
}

/// A listening plain TCP socket.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    options: ServerOptions,
    retained: Option<TcpClient>,
}

impl TcpServer {
    pub fn bind_and_listen(address: &str, port: u16, options: ServerOptions) -> NetResult<Self> {
        if address.is_empty() {
            return Err(NetError::Parameter("empty address".to_string()));
        }
        let addr = (address, port)
            .to_socket_addrs()
            .map_err(|e| NetError::runtime("resolve", e))?
            .next()
            .ok_or_else(|| NetError::runtime_msg("resolve", format!("no address for '{}'", address)))?;

        let listener = bind_listener(addr, options.backlog, options.reuse_addr)?;
        tracing::info!(
            address = ?listener.local_addr().ok(),
            backlog = clamp_backlog(options.backlog),
            "TCP server listening"
        );
        Ok(Self {
            listener,
            options,
            retained: None,
        })
    }

    /// Accept one connection and hand it to the caller.
    ///
    /// With a timeout the listener is polled first and [`Accepted::TimedOut`]
    /// is returned when nobody connects in time.
    pub fn accept(&mut self, timeout: Option<Duration>) -> NetResult<Accepted<TcpClient>> {
        if self.options.auto_close_previous {
            return Err(NetError::Parameter(
                "server retains accepted connections; use accept_retained".to_string(),
            ));
        }
        self.accept_stream(timeout)
    }

    /// Close the previously retained connection, then accept and retain the
    /// next one.
    pub fn accept_retained(&mut self, timeout: Option<Duration>) -> NetResult<Accepted<&mut TcpClient>> {
        if !self.options.auto_close_previous {
            return Err(NetError::Parameter(
                "auto_close_previous is not enabled for this server".to_string(),
            ));
        }
        if let Some(previous) = self.retained.take() {
            close_retrying(previous.into_stream().into_raw_fd());
        }
        match self.accept_stream(timeout)? {
            Accepted::Connection(client) => Ok(Accepted::Connection(self.retained.insert(client))),
            Accepted::TimedOut => Ok(Accepted::TimedOut),
        }
    }

    fn accept_stream(&mut self, timeout: Option<Duration>) -> NetResult<Accepted<TcpClient>> {
        if let Some(timeout) = timeout {
            if !wait_readable(&self.listener, timeout)? {
                metrics::accept_timed_out();
                return Ok(Accepted::TimedOut);
            }
        }
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| NetError::runtime("accept", e))?;
        if self.options.keepalive {
            set_keepalive(&stream, true)?;
        }
        tracing::debug!(peer = %peer, "TCP connection accepted");
        metrics::connection_opened("server", "plain");
        Ok(Accepted::Connection(TcpClient::from_stream(stream)))
    }

    /// The connection kept by [`TcpServer::accept_retained`], if any.
    pub fn retained(&mut self) -> Option<&mut TcpClient> {
        self.retained.as_mut()
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        self.listener.local_addr().map_err(|e| NetError::runtime("getsockname", e))
    }
}

/// Close a descriptor, retrying once if interrupted.
fn close_retrying(fd: RawFd) {
    let result = match nix::unistd::close(fd) {
        Err(Errno::EINTR) => nix::unistd::close(fd),
        other => other,
    };
    match result {
        Ok(()) => metrics::connection_closed(),
        Err(errno) => tracing::warn!(fd, error = %errno, "Closing previous connection failed"),
    }
}
