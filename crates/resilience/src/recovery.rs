use backhaul_protocol::FailureKind;

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try the operation again (subject to the retry policy's budget).
    Retry,
    /// Stop the session; retrying cannot help.
    Abort,
    /// Surface to the caller; likely unrecoverable without intervention.
    Escalate,
}

/// Stateless failure-kind → action mapping.
///
/// A standalone component rather than session-internal logic because any
/// timeout-guarded operation reuses it: pre/post-transfer hooks and
/// compression collaborators included, not just chunk sends.
///
/// The match is exhaustive over [`FailureKind`]; adding a kind without
/// deciding its recovery is a compile error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryPolicy;

impl RecoveryPolicy {
    pub fn decide(&self, kind: &FailureKind) -> RecoveryAction {
        match kind {
            FailureKind::Connection => RecoveryAction::Retry,
            FailureKind::Timeout { .. } => RecoveryAction::Retry,
            FailureKind::ChunkIntegrity { .. } => RecoveryAction::Retry,
            FailureKind::WholeFileIntegrity => RecoveryAction::Retry,
            // Demotes to a full restart at the session layer, not a failure.
            FailureKind::ResumeTokenInvalid => RecoveryAction::Retry,
            FailureKind::Authentication => RecoveryAction::Abort,
            FailureKind::PermissionDenied => RecoveryAction::Abort,
            FailureKind::Protocol => RecoveryAction::Abort,
            FailureKind::Cancelled => RecoveryAction::Abort,
            FailureKind::DiskIo => RecoveryAction::Escalate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_retry() {
        let policy = RecoveryPolicy;
        assert_eq!(
            policy.decide(&FailureKind::Connection),
            RecoveryAction::Retry
        );
        assert_eq!(
            policy.decide(&FailureKind::Timeout {
                operation: "chunk 42 send".into()
            }),
            RecoveryAction::Retry
        );
        assert_eq!(
            policy.decide(&FailureKind::ChunkIntegrity { index: 42 }),
            RecoveryAction::Retry
        );
    }

    #[test]
    fn fatal_kinds_abort() {
        let policy = RecoveryPolicy;
        assert_eq!(
            policy.decide(&FailureKind::Authentication),
            RecoveryAction::Abort
        );
        assert_eq!(
            policy.decide(&FailureKind::PermissionDenied),
            RecoveryAction::Abort
        );
        assert_eq!(policy.decide(&FailureKind::Protocol), RecoveryAction::Abort);
        assert_eq!(
            policy.decide(&FailureKind::Cancelled),
            RecoveryAction::Abort
        );
    }

    #[test]
    fn disk_failures_escalate() {
        assert_eq!(
            RecoveryPolicy.decide(&FailureKind::DiskIo),
            RecoveryAction::Escalate
        );
    }

    #[test]
    fn retry_decisions_agree_with_retryability() {
        // Everything the recovery policy retries must be a kind the retry
        // policy is willing to schedule.
        let policy = RecoveryPolicy;
        let all = [
            FailureKind::Connection,
            FailureKind::Authentication,
            FailureKind::PermissionDenied,
            FailureKind::ChunkIntegrity { index: 0 },
            FailureKind::WholeFileIntegrity,
            FailureKind::Timeout {
                operation: "x".into(),
            },
            FailureKind::ResumeTokenInvalid,
            FailureKind::DiskIo,
            FailureKind::Cancelled,
            FailureKind::Protocol,
        ];
        for kind in all {
            if policy.decide(&kind) == RecoveryAction::Retry {
                assert!(kind.is_retryable(), "{kind} retried but not retryable");
            }
        }
    }
}
