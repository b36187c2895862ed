//! Framed transport for Backhaul sessions.
//!
//! A [`Channel`] is a length-prefixed frame pipe over a plain or
//! TLS-wrapped TCP stream. TLS is negotiated before the first frame;
//! the [`AuthenticationGate`] then runs exactly once per session before
//! any chunk data flows.

mod auth;
mod channel;
mod tls;

pub use auth::{AuthenticationGate, AuthorizationContext, CredentialStore, generate_secret};
pub use channel::Channel;
pub use tls::{CertPolicy, TlsClientSettings, TlsServerSettings, generate_self_signed};
pub use tokio_rustls::TlsAcceptor;

use std::time::Duration;

use backhaul_protocol::{FailureKind, ProtocolError};

/// Read/write buffer size around the socket (256 KiB).
pub const BUFFER_SIZE: usize = 256 * 1024;

/// Deadline for the TCP connect (and TLS handshake, when enabled).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the authentication exchange.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] ProtocolError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    AuthRejected(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Classification for the retry/recovery layer.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            TransportError::Io(_) => FailureKind::Connection,
            TransportError::Frame(ProtocolError::Io(_)) => FailureKind::Connection,
            TransportError::Frame(_) => FailureKind::Protocol,
            TransportError::Tls(_) => FailureKind::Connection,
            TransportError::Timeout => FailureKind::Timeout {
                operation: "connect".into(),
            },
            TransportError::Cancelled => FailureKind::Cancelled,
            TransportError::AuthRejected(_) => FailureKind::Authentication,
            TransportError::PermissionDenied(_) => FailureKind::PermissionDenied,
            TransportError::Protocol(_) => FailureKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_errors_classify_as_connection() {
        let err = TransportError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(err.failure_kind(), FailureKind::Connection);
    }

    #[test]
    fn auth_rejection_is_fatal_kind() {
        let err = TransportError::AuthRejected("bad secret".into());
        assert!(err.failure_kind().is_fatal());
    }

    #[test]
    fn malformed_frame_is_protocol_kind() {
        let err = TransportError::Frame(ProtocolError::UnknownFrameType(0xEE));
        assert_eq!(err.failure_kind(), FailureKind::Protocol);
    }

    #[test]
    fn truncated_frame_is_connection_kind() {
        let inner = ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(
            TransportError::Frame(inner).failure_kind(),
            FailureKind::Connection
        );
    }
}
