//! Closed failure taxonomy shared by every layer.
//!
//! Retry and recovery decisions are data: each fallible operation reports
//! one of these kinds, and the resilience layer maps kinds to actions with
//! an exhaustive match. `Error` frames carry the kind across the wire.

use serde::{Deserialize, Serialize};

/// What went wrong, without the how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Socket connect failure or mid-stream I/O error.
    Connection,
    /// Credentials rejected. Fatal: retrying changes nothing.
    Authentication,
    /// Authenticated but not authorized for the requested operation. Fatal.
    PermissionDenied,
    /// A chunk's digest did not match its declared value.
    ChunkIntegrity { index: u32 },
    /// The reassembled file's digest did not match after all chunks acked.
    WholeFileIntegrity,
    /// An operation exceeded its deadline.
    Timeout { operation: String },
    /// The resume token no longer matches the file identity or has expired.
    ResumeTokenInvalid,
    /// Local disk read/write failure.
    DiskIo,
    /// Cancellation was requested.
    Cancelled,
    /// Malformed or out-of-sequence frame. Fatal.
    Protocol,
}

impl FailureKind {
    /// Kinds that no amount of retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FailureKind::Authentication | FailureKind::PermissionDenied | FailureKind::Protocol
        )
    }

    /// Kinds the retry policy is allowed to see at all.
    ///
    /// `Cancelled` is neither fatal nor retryable: it ends the session
    /// without being an error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Connection
                | FailureKind::ChunkIntegrity { .. }
                | FailureKind::WholeFileIntegrity
                | FailureKind::Timeout { .. }
                | FailureKind::ResumeTokenInvalid
                | FailureKind::DiskIo
        )
    }

    /// Short stable label used in logs and progress reports.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Connection => "connection",
            FailureKind::Authentication => "authentication",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::ChunkIntegrity { .. } => "chunk_integrity",
            FailureKind::WholeFileIntegrity => "whole_file_integrity",
            FailureKind::Timeout { .. } => "timeout",
            FailureKind::ResumeTokenInvalid => "resume_token_invalid",
            FailureKind::DiskIo => "disk_io",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ChunkIntegrity { index } => write!(f, "chunk_integrity({index})"),
            FailureKind::Timeout { operation } => write!(f, "timeout({operation})"),
            other => f.write_str(other.label()),
        }
    }
}
