use tracing::{debug, error};
use uuid::Uuid;

use backhaul_protocol::{FailureKind, FileMetadata};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Idle,
    Connecting,
    Authenticating,
    Negotiating,
    Transferring,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// The session-owned transfer record.
///
/// Exclusively owned and mutated by the session that created it; other
/// components see snapshots. Status transitions are monotonic; the only
/// re-entry is Verifying -> Transferring, when a whole-file mismatch sends
/// flagged chunks again.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub session_id: String,
    pub metadata: FileMetadata,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub last_error: Option<(FailureKind, String)>,
    /// Token for a later resume attempt; survives Failed and Cancelled.
    pub resume_token: Option<String>,
}

impl TransferState {
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            metadata,
            status: TransferStatus::Idle,
            bytes_transferred: 0,
            last_error: None,
            resume_token: None,
        }
    }

    /// Whether the machine may move from `from` to `to`.
    pub fn is_legal(from: TransferStatus, to: TransferStatus) -> bool {
        use TransferStatus::*;
        if from.is_terminal() {
            return false;
        }
        match (from, to) {
            // Cancellation is reachable from any non-terminal state.
            (_, Cancelled) => true,
            // Failure is reachable from any non-terminal state.
            (_, Failed) => true,
            (Idle, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Negotiating) => true,
            (Negotiating, Transferring) => true,
            // Chunk loop; also the reconnect path re-entering the loop.
            (Transferring, Transferring) => true,
            (Transferring, Verifying) => true,
            (Verifying, Completed) => true,
            // Whole-file mismatch: re-send flagged chunks.
            (Verifying, Transferring) => true,
            // Reconnect after a transient failure re-runs the front of
            // the machine without having left Transferring.
            (Transferring, Connecting) => false,
            _ => false,
        }
    }

    /// Applies a transition, refusing illegal ones.
    pub fn transition(&mut self, to: TransferStatus) {
        if Self::is_legal(self.status, to) {
            debug!(session = %self.session_id, from = ?self.status, to = ?to, "state transition");
            self.status = to;
        } else {
            error!(session = %self.session_id, from = ?self.status, to = ?to, "illegal state transition refused");
        }
    }

    /// Terminal failure with the last error attached.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.last_error = Some((kind, message.into()));
        self.transition(TransferStatus::Failed);
    }

    /// Terminal cancellation; resume state is left untouched.
    pub fn cancel(&mut self) {
        self.last_error = Some((FailureKind::Cancelled, "cancellation requested".into()));
        self.transition(TransferStatus::Cancelled);
    }
}
