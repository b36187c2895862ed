//! Transfer sessions: the protocol state machine on both ends.
//!
//! A client-role [`TransferSession`] drives one file's transfer:
//! connect, authenticate, negotiate resume, pipelined chunk loop,
//! whole-file verification. A [`TransferServer`] accepts connections and
//! runs the receiving half of the same machine, staging bytes in a
//! `.part` file and renaming it into place only after the whole file
//! verifies.
//!
//! Retry, recovery, and timeout behavior compose in from
//! `backhaul-resilience`; nothing in here retries by unwinding.

mod client;
mod config;
mod exchange;
mod hooks;
mod progress;
mod server;
mod state;

pub use client::TransferSession;
pub use config::{ServerConfig, SessionConfig};
pub use hooks::{
    HookFuture, NoopHooks, NoopSink, NotificationSink, PassthroughSource, SourceProvider,
    StagedSource, TransferHooks,
};
pub use progress::{Progress, SpeedCalculator};
pub use server::TransferServer;
pub use state::{TransferState, TransferStatus};

use backhaul_chunk::ChunkError;
use backhaul_ledger::LedgerError;
use backhaul_protocol::{FailureKind, ProtocolError};
use backhaul_transport::TransportError;

/// Errors inside a running session, classified for retry/recovery.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Frame(#[from] ProtocolError),

    #[error("peer reported {kind}: {message}")]
    Remote { kind: FailureKind, message: String },

    #[error("{message}")]
    Failure { kind: FailureKind, message: String },
}

impl SessionError {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        SessionError::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Maps this error onto the closed failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::Transport(e) => e.failure_kind(),
            SessionError::Chunk(e) => match e {
                ChunkError::Io(_) => FailureKind::DiskIo,
                ChunkError::ChecksumMismatch { index } => {
                    FailureKind::ChunkIntegrity { index: *index }
                }
                _ => FailureKind::Protocol,
            },
            SessionError::Ledger(e) => match e {
                LedgerError::Io(_) | LedgerError::Codec(_) => FailureKind::DiskIo,
                _ => FailureKind::ResumeTokenInvalid,
            },
            SessionError::Frame(ProtocolError::Io(_)) => FailureKind::Connection,
            SessionError::Frame(_) => FailureKind::Protocol,
            SessionError::Remote { kind, .. } => kind.clone(),
            SessionError::Failure { kind, .. } => kind.clone(),
        }
    }
}
