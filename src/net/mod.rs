//! Network transport subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint text ("host:port", "[v6]:service")
//!     → endpoint.rs (split, service lookup, DNS resolution)
//!     → address.rs (normalized 16-byte address, classification)
//!
//! Client:
//!     Connection::connect → tcp.rs (dial) → (TLS handshake) → Established
//!
//! Server:
//!     Listener::listen → (certificate + key) → bind on first use
//!         → accept → (TLS handshake) → Connection
//!
//! Connection States:
//!     Unconnected → Connecting → TlsHandshaking → Established → Closed
//! ```
//!
//! # Design Decisions
//! - Everything is blocking and runs on the caller's thread
//! - The plain/TLS choice is made once per connection, not per I/O call
//! - `tcp.rs` stays usable on its own for callers that never need TLS

pub mod address;
pub mod connection;
pub mod endpoint;
pub mod listener;
pub mod tcp;

pub use address::{Address, NetworkType, Protocol};
pub use connection::{ConnectMode, ConnectOptions, Connection, ConnectionId, ConnectionState, Role, Transfer};
pub use listener::{ListenMode, ListenOptions, Listener};
pub use tcp::{Accepted, ServerOptions, TcpClient, TcpServer};
