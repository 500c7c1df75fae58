//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! every field has a default, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::connection::{ConnectMode, ConnectOptions};
use crate::net::listener::{ListenMode, ListenOptions, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::net::tcp::DEFAULT_BACKLOG;
use crate::tls::{DEFAULT_TRUST_STORE, DEFAULT_VERIFY_DEPTH};

/// Root configuration for the transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Outgoing connection settings.
    pub client: ClientConfig,

    /// Listening endpoint settings.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Client connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Peer endpoint (e.g., "example.org:443").
    pub endpoint: String,

    pub mode: ConnectMode,

    pub tls: TlsOptionsConfig,

    /// Connect timeout in milliseconds; 0 waits for the OS.
    pub connect_timeout_ms: u64,

    pub keepalive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7000".to_string(),
            mode: ConnectMode::Plain,
            tls: TlsOptionsConfig::default(),
            connect_timeout_ms: 0,
            keepalive: false,
        }
    }
}

impl ClientConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            cipher_list: self.tls.cipher_list.clone(),
            trust_store: self.tls.trust_store.clone(),
            verify_depth: self.tls.verify_depth,
            sni_host: self.tls.sni_host.clone(),
            connect_timeout: (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms)),
            keepalive: self.keepalive,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind endpoint (e.g., "0.0.0.0:7000").
    pub bind_address: String,

    /// Accept queue length (clamped to 5..=1000).
    pub max_connections: u32,

    pub reuse_addr: bool,

    /// Keepalive on accepted connections.
    pub keepalive: bool,

    pub mode: ListenMode,

    /// Path to certificate chain (PEM).
    pub cert_path: Option<PathBuf>,

    /// Path to private key (PEM).
    pub key_path: Option<PathBuf>,

    /// Handshake deadline for accepted TLS peers in milliseconds; 0 waits forever.
    pub handshake_timeout_ms: u64,

    pub tls: TlsOptionsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7000".to_string(),
            max_connections: DEFAULT_BACKLOG,
            reuse_addr: true,
            keepalive: true,
            mode: ListenMode::Plain,
            cert_path: None,
            key_path: None,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            tls: TlsOptionsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            max_connections: self.max_connections,
            reuse_addr: self.reuse_addr,
            keepalive: self.keepalive,
            certificate: self.cert_path.clone(),
            private_key: self.key_path.clone(),
            cipher_list: self.tls.cipher_list.clone(),
            mode: self.mode,
            handshake_timeout: (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms)),
        }
    }
}

/// TLS tuning shared by client and server sections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsOptionsConfig {
    /// Cipher list expression (e.g., "HIGH:!aNULL"). Unset uses the mode default.
    pub cipher_list: Option<String>,

    /// Directory of PEM trust anchors or a single PEM bundle.
    pub trust_store: PathBuf,

    /// Maximum certificate chain length.
    pub verify_depth: u32,

    /// Name to send as SNI and verify against.
    pub sni_host: Option<String>,
}

impl Default for TlsOptionsConfig {
    fn default() -> Self {
        Self {
            cipher_list: None,
            trust_store: PathBuf::from(DEFAULT_TRUST_STORE),
            verify_depth: DEFAULT_VERIFY_DEPTH,
            sni_host: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
