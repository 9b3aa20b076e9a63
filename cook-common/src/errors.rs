//! Error taxonomy for scheduler integration tests.
//!
//! | Variant                 | Retried by a poll? | Meaning                                  |
//! |-------------------------|--------------------|------------------------------------------|
//! | `Transport`             | yes                | connection refused/reset, DNS, timeout    |
//! | `UnexpectedStatus`      | no                 | response code outside the expected set    |
//! | `ConditionTimeout`      | n/a                | a bounded poll never saw its condition    |
//! | `CredentialAcquisition` | no                 | ticket command unset or failed            |
//!
//! Mutating calls (submit, kill, retry) never retry on their own; only queries
//! driven by [`crate::poller`] are re-issued.

use std::fmt;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = CookError> = std::result::Result<T, E>;

/// Coarse classification of a network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    HostNotFound,
    ConnectFailed,
    TimedOut,
    Tls,
    InvalidUrl,
    Io,
    Other,
}

impl TransportErrorKind {
    /// Whether this failure means the service could not be reached at all.
    ///
    /// Only these kinds are retried while waiting for the scheduler to come up.
    pub fn is_connectivity(self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused
                | Self::ConnectionReset
                | Self::HostNotFound
                | Self::ConnectFailed
                | Self::TimedOut
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::HostNotFound => "host not found",
            Self::ConnectFailed => "connect failed",
            Self::TimedOut => "timed out",
            Self::Tls => "tls failure",
            Self::InvalidUrl => "invalid url",
            Self::Io => "i/o error",
            Self::Other => "transport failure",
        };
        f.write_str(name)
    }
}

/// A network-level failure talking to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        self.kind.is_connectivity()
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            ureq::Error::Io(io) => match io.kind() {
                ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected => TransportErrorKind::ConnectionReset,
                ErrorKind::TimedOut => TransportErrorKind::TimedOut,
                _ => TransportErrorKind::Io,
            },
            ureq::Error::HostNotFound => TransportErrorKind::HostNotFound,
            ureq::Error::ConnectionFailed => TransportErrorKind::ConnectFailed,
            ureq::Error::Timeout(_) => TransportErrorKind::TimedOut,
            ureq::Error::Tls(_) => TransportErrorKind::Tls,
            ureq::Error::BadUri(_) | ureq::Error::Http(_) => TransportErrorKind::InvalidUrl,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors surfaced by the harness.
#[derive(Debug, Error)]
pub enum CookError {
    #[error("{operation}: {source}")]
    Transport {
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("{operation} returned HTTP {status} (expected {expected:?}): {body}")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        expected: Vec<u16>,
        body: String,
    },

    #[error(
        "condition not met after {attempts} attempts in {elapsed_ms}ms; last observed: {last_observed}"
    )]
    ConditionTimeout {
        attempts: u32,
        elapsed_ms: u64,
        last_observed: String,
    },

    #[error("could not acquire credentials for {principal}: {reason}")]
    CredentialAcquisition { principal: String, reason: String },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported authentication scheme: {0}")]
    UnsupportedAuthScheme(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CookError {
    pub fn transport(operation: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Self::Transport {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Whether a poll should treat this error as "not yet" rather than abort.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether this error means the service is not reachable yet.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
