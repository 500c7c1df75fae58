//! Error taxonomy for the transport layer.
//!
//! Every failure is translated into one [`NetError`] at the point where it
//! happens. Runtime failures always name the step that failed and keep the
//! OS error as their source.

use std::io;
use thiserror::Error;

/// Flat classification of a [`NetError`], for callers that only branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller supplied invalid input; no I/O was attempted.
    Parameter,
    /// An address could not be parsed or formatted.
    InvalidArgument,
    /// A system or library call failed after valid input.
    Runtime,
    /// TLS setup, handshake or verification failed.
    Initialization,
    /// A TLS operation was attempted before the crypto bootstrap ran.
    InitializationMissing,
    /// The connection was already closed.
    NotConnected,
}

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Invalid caller input (empty address, port out of range, unknown protocol).
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Address text that cannot be parsed, resolved or rendered.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A system call failed; `step` names the operation.
    #[error("{step} failed: {source}")]
    Runtime {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// TLS context, handshake or certificate verification failure.
    #[error("TLS initialization error: {0}")]
    Initialization(String),

    /// TLS used before [`crate::tls::ensure_initialized`] ran.
    #[error("TLS used before the crypto bootstrap was initialized")]
    InitializationMissing,

    /// Operation on a closed connection.
    #[error("not connected")]
    NotConnected,
}

impl NetError {
    /// Build a runtime error for `step` from an I/O error.
    pub fn runtime(step: &'static str, source: io::Error) -> Self {
        NetError::Runtime { step, source }
    }

    /// Build a runtime error for `step` with a message and no OS error.
    pub fn runtime_msg(step: &'static str, message: impl Into<String>) -> Self {
        NetError::Runtime {
            step,
            source: io::Error::new(io::ErrorKind::Other, message.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::Parameter(_) => ErrorKind::Parameter,
            NetError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            NetError::Runtime { .. } => ErrorKind::Runtime,
            NetError::Initialization(_) => ErrorKind::Initialization,
            NetError::InitializationMissing => ErrorKind::InitializationMissing,
            NetError::NotConnected => ErrorKind::NotConnected,
        }
    }

    /// The preserved OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            NetError::Runtime { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl From<NetError> for io::Error {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Runtime { source, .. } => source,
            NetError::NotConnected => io::Error::new(io::ErrorKind::NotConnected, err),
            NetError::Parameter(_) | NetError::InvalidArgument(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_step() {
        let err = NetError::runtime(
            "connect",
            io::Error::from_raw_os_error(libc_econnrefused()),
        );
        assert!(err.to_string().starts_with("connect failed"));
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err.raw_os_error(), Some(libc_econnrefused()));
    }

    #[test]
    fn test_error_into_io() {
        let io_err: io::Error = NetError::NotConnected.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);

        let io_err: io::Error = NetError::Parameter("port".into()).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }

    fn libc_econnrefused() -> i32 {
        nix::errno::Errno::ECONNREFUSED as i32
    }
}
