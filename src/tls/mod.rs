//! TLS subsystem.
//!
//! # Data Flow
//! ```text
//! ensure_initialized()           (bootstrap.rs, once per process)
//!     → TlsClientContext / TlsServerContext   (context.rs)
//!         → cipher list selection              (ciphers.rs)
//!         → trust store + PolicyVerifier       (verify.rs)
//!     → rustls session wrapped by net::connection
//!
//! Any failure:
//!     record_error() → drain_error_log() → NetError::Initialization
//! ```
//!
//! # Design Decisions
//! - Contexts are immutable after construction and shared via `Arc`
//! - Sessions are owned by exactly one connection

pub mod bootstrap;
pub mod ciphers;
pub mod context;
pub mod verify;

pub use bootstrap::{drain_error_log, ensure_initialized, is_initialized, TlsErrorRecord};
pub use context::{TlsClientContext, TlsServerContext, DEFAULT_TRUST_STORE, DEFAULT_VERIFY_DEPTH};
pub use verify::PolicyVerifier;
