//! Blocking network transport: addresses, endpoint parsing, plain TCP and
//! unified plain/TLS connections and listeners.

pub mod config;
pub mod error;
pub mod net;
pub mod observability;
pub mod tls;

pub use config::schema::TransportConfig;
pub use error::{ErrorKind, NetError, NetResult};
pub use net::{
    Accepted, Address, ConnectMode, ConnectOptions, Connection, ListenMode, ListenOptions, Listener, NetworkType,
    Protocol, Transfer,
};
pub use tls::ensure_initialized;
