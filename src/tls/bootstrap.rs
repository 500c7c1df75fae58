//! Process-wide crypto bootstrap and the TLS error side channel.
//!
//! # Responsibilities
//! - Install the process default `CryptoProvider` exactly once
//! - Refuse a second concurrent first call instead of racing it
//! - Keep a thread-local queue of TLS failures and drain it into the log
//!
//! # Design Decisions
//! - No teardown: the provider stays installed for the life of the process
//! - Every TLS failure is queued at the point where it happens and drained
//!   before it is translated into a [`NetError`], so the queue never leaks
//!   state across calls

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;

use crate::error::{NetError, NetResult};

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);

thread_local! {
    static ERROR_QUEUE: RefCell<VecDeque<TlsErrorRecord>> = const { RefCell::new(VecDeque::new()) };
}

/// Initialize the crypto layer. Idempotent once it has completed.
///
/// Two threads making the *first* call at the same time is a fatal
/// initialization error for the loser; run this from `main` before
/// spawning threads that use TLS.
pub fn ensure_initialized() -> NetResult<()> {
    if !claim_first_call(&STATE)? {
        return Ok(());
    }

    let provider = rustls::crypto::ring::default_provider();
    let cipher_suites = provider.cipher_suites.len();
    let kx_groups = provider.kx_groups.len();
    if provider.install_default().is_err() {
        tracing::debug!("Process crypto provider was already installed");
    }

    STATE.store(READY, Ordering::Release);
    tracing::info!(cipher_suites, kx_groups, "Crypto bootstrap complete");
    Ok(())
}

/// `Ok(true)` if the caller won the first call and must finish setup.
fn claim_first_call(state: &AtomicU8) -> NetResult<bool> {
    match state.compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok(true),
        Err(READY) => Ok(false),
        Err(_) => Err(NetError::Initialization(
            "crypto bootstrap raced with a concurrent first call".to_string(),
        )),
    }
}

pub fn is_initialized() -> bool {
    STATE.load(Ordering::Acquire) == READY
}

/// Fail with [`NetError::InitializationMissing`] unless bootstrapped.
pub(crate) fn require_initialized() -> NetResult<()> {
    if is_initialized() {
        Ok(())
    } else {
        Err(NetError::InitializationMissing)
    }
}

/// The provider TLS contexts are built from.
pub(crate) fn provider() -> NetResult<Arc<CryptoProvider>> {
    require_initialized()?;
    Ok(CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider())))
}

/// Serialized bootstrap for unit tests, which run on parallel threads.
#[cfg(test)]
pub(crate) fn init_for_tests() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| ensure_initialized().expect("crypto bootstrap"));
}

/// One queued TLS failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsErrorRecord {
    pub code: u32,
    pub library: &'static str,
    pub function: &'static str,
    pub reason: String,
    pub file: &'static str,
    pub line: u32,
    pub detail: Option<String>,
}

/// Queue a TLS engine error raised inside `function`.
#[track_caller]
pub(crate) fn record_error(function: &'static str, err: &rustls::Error) {
    let (code, library) = classify(err);
    push(code, library, function, err.to_string(), None, Location::caller());
}

/// Queue a failure from outside the TLS engine (PEM files, trust store).
#[track_caller]
pub(crate) fn record_failure(library: &'static str, function: &'static str, reason: impl Into<String>, detail: Option<String>) {
    push(0, library, function, reason.into(), detail, Location::caller());
}

/// Queue the TLS error carried inside an I/O error, or the I/O error itself.
#[track_caller]
pub(crate) fn record_io_error(function: &'static str, err: &std::io::Error) {
    match err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        Some(tls) => record_error(function, tls),
        None => record_failure("io", function, err.to_string(), err.raw_os_error().map(|code| format!("errno {}", code))),
    }
}

fn push(
    code: u32,
    library: &'static str,
    function: &'static str,
    reason: String,
    detail: Option<String>,
    location: &'static Location<'static>,
) {
    let record = TlsErrorRecord {
        code,
        library,
        function,
        reason,
        file: location.file(),
        line: location.line(),
        detail,
    };
    ERROR_QUEUE.with(|queue| queue.borrow_mut().push_back(record));
}

fn classify(err: &rustls::Error) -> (u32, &'static str) {
    use rustls::Error;

    match err {
        Error::InappropriateMessage { .. } => (1, "rustls"),
        Error::InappropriateHandshakeMessage { .. } => (2, "rustls"),
        Error::InvalidMessage(_) => (3, "rustls"),
        Error::NoCertificatesPresented => (4, "rustls"),
        Error::UnsupportedNameType => (5, "rustls"),
        Error::DecryptError => (6, "rustls"),
        Error::EncryptError => (7, "rustls"),
        Error::PeerIncompatible(_) => (8, "rustls"),
        Error::PeerMisbehaved(_) => (9, "rustls"),
        Error::AlertReceived(_) => (10, "rustls"),
        Error::InvalidCertificate(_) => (11, "webpki"),
        Error::InvalidCertRevocationList(_) => (12, "webpki"),
        Error::General(_) => (13, "rustls"),
        Error::FailedToGetCurrentTime => (14, "rustls"),
        Error::FailedToGetRandomBytes => (15, "rustls"),
        Error::HandshakeNotComplete => (16, "rustls"),
        Error::PeerSentOversizedRecord => (17, "rustls"),
        Error::NoApplicationProtocol => (18, "rustls"),
        Error::BadMaxFragmentSize => (19, "rustls"),
        _ => (99, "rustls"),
    }
}

/// Pop every queued error on this thread and log one line per error.
/// Returns the number of errors drained.
pub fn drain_error_log() -> usize {
    let drained: Vec<TlsErrorRecord> = ERROR_QUEUE.with(|queue| queue.borrow_mut().drain(..).collect());
    for record in &drained {
        tracing::error!(
            code = record.code,
            library = record.library,
            function = record.function,
            reason = %record.reason,
            file = record.file,
            line = record.line,
            detail = record.detail.as_deref().unwrap_or(""),
            "TLS error"
        );
    }
    drained.len()
}

/// Number of errors waiting on this thread's queue.
pub fn pending_errors() -> usize {
    ERROR_QUEUE.with(|queue| queue.borrow().len())
}
