//! Shared utilities for integration tests.

use std::fs;
use std::path::PathBuf;
use std::sync::Once;
use std::thread::{self, JoinHandle};

use netcore::{Connection, Listener};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::TempDir;

/// Run the crypto bootstrap once for the whole test binary.
#[allow(dead_code)]
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| netcore::ensure_initialized().expect("crypto bootstrap"));
}

/// Certificate material written to a temporary directory.
#[allow(dead_code)]
pub struct TestPki {
    /// Keeps the files alive for the duration of the test.
    pub dir: TempDir,
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Issuing CA certificate, when the leaf is not self-signed.
    pub ca: Option<PathBuf>,
}

/// A self-signed certificate for `localhost`.
#[allow(dead_code)]
pub fn self_signed() -> TestPki {
    let dir = tempfile::tempdir().unwrap();
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    fs::write(&cert, certified.cert.pem()).unwrap();
    fs::write(&key, certified.key_pair.serialize_pem()).unwrap();
    TestPki {
        dir,
        cert,
        key,
        ca: None,
    }
}

/// A `localhost` leaf signed by a freshly generated CA.
#[allow(dead_code)]
pub fn ca_signed() -> TestPki {
    let dir = tempfile::tempdir().unwrap();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.distinguished_name.push(DnType::CommonName, "netcore test CA");
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    leaf_params.distinguished_name.push(DnType::CommonName, "localhost");
    let leaf_key = KeyPair::generate().unwrap();
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    let ca = dir.path().join("ca.pem");
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    fs::write(&ca, ca_cert.pem()).unwrap();
    fs::write(&cert, leaf_cert.pem()).unwrap();
    fs::write(&key, leaf_key.serialize_pem()).unwrap();
    TestPki {
        dir,
        cert,
        key,
        ca: Some(ca),
    }
}

/// Accept `count` connections and echo lines back on each until the peer
/// closes. Accept failures are returned instead of panicking.
#[allow(dead_code)]
pub fn spawn_echo(mut listener: Listener, count: usize) -> JoinHandle<Vec<netcore::NetResult<()>>> {
    thread::spawn(move || {
        (0..count)
            .map(|_| listener.accept().map(echo_lines))
            .collect()
    })
}

#[allow(dead_code)]
fn echo_lines(mut conn: Connection) {
    loop {
        match conn.read_line() {
            Ok((_, 0)) | Err(_) => break,
            Ok((line, _)) => {
                if conn.write(format!("{}\n", line).as_bytes()).is_err() {
                    break;
                }
            }
        }
    }
    let _ = conn.close();
}
