//! TLS context construction.
//!
//! # Responsibilities
//! - Build client configs: protocol range, cipher list, trust store, policy verifier
//! - Build server configs from a PEM certificate chain and private key
//! - Load trust stores from a directory of PEM files or a single bundle
//!
//! # Design Decisions
//! - Only TLS 1.2 and TLS 1.3 are offered; the engine implements neither
//!   SSLv3/TLS 1.0 nor record compression
//! - A context is immutable once built and shared through `Arc`
//! - Every failure is queued on the TLS error log, drained, then returned
//!   as [`NetError::Initialization`]

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};

use crate::error::{NetError, NetResult};
use crate::tls::bootstrap;
use crate::tls::ciphers;
use crate::tls::verify::PolicyVerifier;

pub const DEFAULT_TRUST_STORE: &str = "/etc/ssl/certs";
pub const DEFAULT_VERIFY_DEPTH: u32 = 4;

/// Drain the error log and build an initialization error.
fn init_error(message: String) -> NetError {
    bootstrap::drain_error_log();
    NetError::Initialization(message)
}

/// Provider restricted to the suites selected by `cipher_list`.
fn restricted_provider(cipher_list: &str) -> NetResult<(Arc<CryptoProvider>, Vec<&'static SupportedProtocolVersion>)> {
    let base = bootstrap::provider()?;
    let suites = ciphers::select(cipher_list, &base.cipher_suites)?;

    let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
    if suites.iter().any(|s| matches!(s, SupportedCipherSuite::Tls13(_))) {
        versions.push(&rustls::version::TLS13);
    }
    if suites.iter().any(|s| matches!(s, SupportedCipherSuite::Tls12(_))) {
        versions.push(&rustls::version::TLS12);
    }

    let provider = CryptoProvider {
        cipher_suites: suites,
        ..(*base).clone()
    };
    Ok((Arc::new(provider), versions))
}

/// Client-side TLS context: config plus the verifier that judged the peer.
#[derive(Debug, Clone)]
pub struct TlsClientContext {
    config: Arc<ClientConfig>,
    verifier: Arc<PolicyVerifier>,
}

impl TlsClientContext {
    /// Build a client context.
    ///
    /// `enforce` selects whether a failed chain verification aborts the
    /// handshake or is only remembered.
    pub fn new(cipher_list: &str, trust_store: &Path, verify_depth: u32, enforce: bool) -> NetResult<Self> {
        bootstrap::require_initialized()?;
        let (provider, versions) = restricted_provider(cipher_list)?;

        let roots = load_trust_store(trust_store);
        tracing::debug!(
            trust_store = %trust_store.display(),
            anchors = roots.len(),
            verify_depth,
            enforce,
            "Trust store loaded"
        );
        let verifier = Arc::new(PolicyVerifier::new(roots, provider.clone(), enforce, verify_depth));

        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| {
                bootstrap::record_error("with_protocol_versions", &e);
                init_error(format!("TLS client context: {}", e))
            })?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            verifier,
        })
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn verifier(&self) -> &PolicyVerifier {
        &self.verifier
    }
}

/// Server-side TLS context, shared read-only with accepted connections.
#[derive(Debug, Clone)]
pub struct TlsServerContext {
    config: Arc<ServerConfig>,
}

impl TlsServerContext {
    /// Load `certificate` (PEM chain) and `private_key`, check that they
    /// belong together and build the server config.
    pub fn new(certificate: &Path, private_key: &Path, cipher_list: &str) -> NetResult<Self> {
        bootstrap::require_initialized()?;
        let (provider, versions) = restricted_provider(cipher_list)?;

        let chain = load_certificates(certificate)?;
        let key = load_private_key(private_key)?;

        let signing_key = provider.key_provider.load_private_key(key.clone_key()).map_err(|e| {
            bootstrap::record_error("load_private_key", &e);
            init_error(format!("unsupported private key {}: {}", private_key.display(), e))
        })?;
        CertifiedKey::new(chain.clone(), signing_key).keys_match().map_err(|e| {
            bootstrap::record_error("keys_match", &e);
            init_error(format!(
                "private key {} does not match certificate {}",
                private_key.display(),
                certificate.display()
            ))
        })?;

        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| {
                bootstrap::record_error("with_protocol_versions", &e);
                init_error(format!("TLS server context: {}", e))
            })?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| {
                bootstrap::record_error("with_single_cert", &e);
                init_error(format!("TLS server context: {}", e))
            })?;

        tracing::info!(
            certificate = %certificate.display(),
            "TLS server context ready"
        );
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

/// Load a PEM certificate chain. An empty file is an error.
pub fn load_certificates(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        bootstrap::record_failure("pem", "load_certificates", e.to_string(), Some(path.display().to_string()));
        init_error(format!("cannot open certificate {}: {}", path.display(), e))
    })?;
    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            bootstrap::record_failure("pem", "load_certificates", e.to_string(), Some(path.display().to_string()));
            init_error(format!("malformed certificate {}: {}", path.display(), e))
        })?;
    if chain.is_empty() {
        bootstrap::record_failure("pem", "load_certificates", "no certificate found", Some(path.display().to_string()));
        return Err(init_error(format!("no certificate in {}", path.display())));
    }
    Ok(chain)
}

/// Load a PEM private key.
///
/// The generic loader is tried first; if it finds nothing the key-type
/// specific loaders (PKCS#8, PKCS#1 RSA, SEC1 EC) are tried in turn.
pub fn load_private_key(path: &Path) -> NetResult<PrivateKeyDer<'static>> {
    let pem = fs::read(path).map_err(|e| {
        bootstrap::record_failure("pem", "load_private_key", e.to_string(), Some(path.display().to_string()));
        init_error(format!("cannot open private key {}: {}", path.display(), e))
    })?;

    match rustls_pemfile::private_key(&mut pem.as_slice()) {
        Ok(Some(key)) => return Ok(key),
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Generic key loader failed, trying typed loaders");
        }
    }

    let typed = rustls_pemfile::pkcs8_private_keys(&mut pem.as_slice())
        .flatten()
        .next()
        .map(PrivateKeyDer::from)
        .or_else(|| {
            rustls_pemfile::rsa_private_keys(&mut pem.as_slice())
                .flatten()
                .next()
                .map(PrivateKeyDer::from)
        })
        .or_else(|| {
            rustls_pemfile::ec_private_keys(&mut pem.as_slice())
                .flatten()
                .next()
                .map(PrivateKeyDer::from)
        });

    typed.ok_or_else(|| {
        bootstrap::record_failure("pem", "load_private_key", "no private key found", Some(path.display().to_string()));
        init_error(format!("no private key in {}", path.display()))
    })
}

/// Load trust anchors from a directory of PEM files or a single PEM bundle.
///
/// Unreadable files and unparsable certificates are skipped; a missing
/// store yields an empty set.
pub fn load_trust_store(path: &Path) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let files: Vec<std::path::PathBuf> = if path.is_dir() {
        match fs::read_dir(path) {
            Ok(entries) => entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.is_file())
                .collect(),
            Err(e) => {
                tracing::warn!(trust_store = %path.display(), error = %e, "Cannot read trust store");
                Vec::new()
            }
        }
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        tracing::warn!(trust_store = %path.display(), "Trust store does not exist");
        Vec::new()
    };

    for file in files {
        let Ok(handle) = File::open(&file) else {
            continue;
        };
        let mut reader = BufReader::new(handle);
        let certs = rustls_pemfile::certs(&mut reader).flatten();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            tracing::trace!(file = %file.display(), added, ignored, "Skipped unparsable trust anchors");
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_pem(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn self_signed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = write_pem(dir, "cert.pem", &certified.cert.pem());
        let key = write_pem(dir, "key.pem", &certified.key_pair.serialize_pem());
        (cert, key)
    }

    #[test]
    fn test_server_context_loads_matching_pair() {
        bootstrap::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = self_signed(dir.path());
        assert!(TlsServerContext::new(&cert, &key, ciphers::ALL_CIPHERS).is_ok());
    }

    #[test]
    fn test_server_context_rejects_mismatched_key() {
        bootstrap::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = self_signed(dir.path());
        let other = rcgen::generate_simple_self_signed(vec!["other".to_string()]).unwrap();
        let key = write_pem(dir.path(), "other-key.pem", &other.key_pair.serialize_pem());

        let err = TlsServerContext::new(&cert, &key, ciphers::ALL_CIPHERS).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Initialization);
        assert_eq!(bootstrap::pending_errors(), 0);
    }

    #[test]
    fn test_missing_files() {
        bootstrap::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        assert!(load_certificates(&dir.path().join("nope.pem")).is_err());
        assert!(load_private_key(&dir.path().join("nope.pem")).is_err());

        let empty = write_pem(dir.path(), "empty.pem", "");
        assert!(load_certificates(&empty).is_err());
        assert!(load_private_key(&empty).is_err());
    }

    #[test]
    fn test_trust_store_from_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = self_signed(dir.path());
        assert_eq!(load_trust_store(&cert).len(), 1);
        // key.pem holds no certificate and is skipped.
        assert_eq!(load_trust_store(dir.path()).len(), 1);
        assert_eq!(load_trust_store(&dir.path().join("missing")).len(), 0);
    }

    #[test]
    fn test_client_context_builds_with_empty_store() {
        bootstrap::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let ctx = TlsClientContext::new(ciphers::HARDENED_CIPHERS, dir.path(), DEFAULT_VERIFY_DEPTH, true).unwrap();
        assert!(ctx.verifier().is_enforced());
        assert!(TlsClientContext::new("aNULL", dir.path(), DEFAULT_VERIFY_DEPTH, true).is_err());
    }
}
