use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use backhaul_protocol::FailureKind;

use crate::recovery::{RecoveryAction, RecoveryPolicy};

/// Result of a guarded operation.
#[derive(Debug)]
pub enum GuardOutcome<T> {
    Ok(T),
    /// The operation failed (or timed out, or was cancelled); the failure
    /// kind and the recovery policy's decision travel together.
    Failed {
        kind: FailureKind,
        action: RecoveryAction,
    },
}

impl<T> GuardOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, GuardOutcome::Ok(_))
    }
}

/// Runs any fallible operation under a per-operation deadline.
///
/// The operation is a value, not a subclassed service: pass a future,
/// get back either its output or a `(kind, action)` pair. Deadlines are
/// per operation; a fast chunk never inherits a slow chunk's remaining
/// budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutGuard {
    recovery: RecoveryPolicy,
}

impl TimeoutGuard {
    pub fn new(recovery: RecoveryPolicy) -> Self {
        Self { recovery }
    }

    /// Executes `operation` under `deadline`, honoring cancellation.
    ///
    /// On expiry the failure is tagged with the operation's identity
    /// (`"chunk 42 send"`, `"pre-transfer hook"`, ...) so logs and retry
    /// decisions can tell operations apart.
    pub async fn run<T, F>(
        &self,
        operation: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        future: F,
    ) -> GuardOutcome<T>
    where
        F: Future<Output = Result<T, FailureKind>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let kind = FailureKind::Cancelled;
                let action = self.recovery.decide(&kind);
                GuardOutcome::Failed { kind, action }
            }
            result = tokio::time::timeout(deadline, future) => match result {
                Ok(Ok(value)) => GuardOutcome::Ok(value),
                Ok(Err(kind)) => {
                    let action = self.recovery.decide(&kind);
                    GuardOutcome::Failed { kind, action }
                }
                Err(_) => {
                    warn!(operation, deadline_ms = deadline.as_millis() as u64, "operation deadline expired");
                    let kind = FailureKind::Timeout {
                        operation: operation.to_string(),
                    };
                    let action = self.recovery.decide(&kind);
                    GuardOutcome::Failed { kind, action }
                }
            }
        }
    }
}
