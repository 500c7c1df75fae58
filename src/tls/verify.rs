//! Server certificate verification policy.
//!
//! `PolicyVerifier` runs webpki chain verification against the configured
//! trust store plus a chain-depth limit. When the policy is not enforced
//! a failed verification is remembered and the handshake continues; the
//! connection reads the outcome afterwards and logs it.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::tls::bootstrap;

#[derive(Debug)]
pub struct PolicyVerifier {
    /// `None` when the trust store yielded no usable anchor.
    webpki: Option<Arc<WebPkiServerVerifier>>,
    unavailable_reason: String,
    enforce: bool,
    max_depth: u32,
    provider: Arc<CryptoProvider>,
    failure: Mutex<Option<String>>,
}

impl PolicyVerifier {
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>, enforce: bool, max_depth: u32) -> Self {
        let (webpki, unavailable_reason) =
            match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build() {
                Ok(verifier) => (Some(verifier), String::new()),
                Err(e) => (None, format!("trust store unusable: {}", e)),
            };
        Self {
            webpki,
            unavailable_reason,
            enforce,
            max_depth,
            provider,
            failure: Mutex::new(None),
        }
    }

    /// Why verification failed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let depth = intermediates.len() + 1;
        if depth > self.max_depth as usize {
            return Err(rustls::Error::General(format!(
                "certificate chain of {} exceeds verification depth {}",
                depth, self.max_depth
            )));
        }
        match &self.webpki {
            Some(webpki) => webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now),
            None => Err(rustls::Error::General(self.unavailable_reason.clone())),
        }
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.verify_chain(end_entity, intermediates, server_name, ocsp_response, now) {
            Ok(verified) => Ok(verified),
            Err(e) => {
                bootstrap::record_error("verify_server_cert", &e);
                *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                if self.enforce {
                    Err(e)
                } else {
                    Ok(ServerCertVerified::assertion())
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    fn some_cert() -> CertificateDer<'static> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        cert.cert.der().clone()
    }

    #[test]
    fn test_lenient_policy_records_failure() {
        let verifier = PolicyVerifier::new(RootCertStore::empty(), provider(), false, 4);
        let name = ServerName::try_from("localhost").unwrap();
        let result = verifier.verify_server_cert(&some_cert(), &[], &name, &[], UnixTime::now());
        assert!(result.is_ok());
        assert!(verifier.failure().is_some());
        assert!(bootstrap::drain_error_log() >= 1);
    }

    #[test]
    fn test_enforced_policy_fails() {
        let verifier = PolicyVerifier::new(RootCertStore::empty(), provider(), true, 4);
        let name = ServerName::try_from("localhost").unwrap();
        let result = verifier.verify_server_cert(&some_cert(), &[], &name, &[], UnixTime::now());
        assert!(result.is_err());
        assert!(verifier.failure().is_some());
        bootstrap::drain_error_log();
    }

    #[test]
    fn test_depth_limit() {
        let verifier = PolicyVerifier::new(RootCertStore::empty(), provider(), true, 1);
        let name = ServerName::try_from("localhost").unwrap();
        let chain = vec![some_cert()];
        let err = verifier
            .verify_server_cert(&some_cert(), &chain, &name, &[], UnixTime::now())
            .unwrap_err();
        assert!(err.to_string().contains("verification depth"));
        bootstrap::drain_error_log();
    }
}
