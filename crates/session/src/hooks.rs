//! Collaborator seams.
//!
//! Everything outside the transfer core (database stop/start,
//! compression, encryption, failure notification) reaches the session
//! only through these narrow traits. Hook futures run under the same
//! [`TimeoutGuard`](backhaul_resilience::TimeoutGuard) as transfer
//! operations, so a hung database stop times out and recovers like any
//! other operation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use backhaul_protocol::{EncryptionMetadata, FailureKind};

use crate::state::TransferState;

/// Boxed hook future; hooks are values, not subclassed services.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), FailureKind>> + Send + 'a>>;

/// Pre/post-transfer bracket. The caller's database-service control
/// (quiesce before reading the archive, restart after) lives behind this.
pub trait TransferHooks: Send + Sync {
    fn pre_transfer(&self) -> HookFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn post_transfer(&self) -> HookFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Default: no bracket.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TransferHooks for NoopHooks {}

/// A staged source file ready for chunking, with any encryption
/// metadata to carry alongside the file metadata.
#[derive(Debug, Clone)]
pub struct StagedSource {
    pub path: PathBuf,
    pub encryption: Option<EncryptionMetadata>,
}

/// Supplies the byte stream that gets chunked.
///
/// Compression or encryption providers stage a transformed copy and
/// return its path; the transfer core never knows the difference.
pub trait SourceProvider: Send + Sync {
    fn stage(&self, source: &Path) -> Result<StagedSource, FailureKind>;
}

/// Default: transfer the file as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSource;

impl SourceProvider for PassthroughSource {
    fn stage(&self, source: &Path) -> Result<StagedSource, FailureKind> {
        Ok(StagedSource {
            path: source.to_path_buf(),
            encryption: None,
        })
    }
}

/// Invoked once, fire-and-forget, when a session ends Failed.
pub trait NotificationSink: Send + Sync {
    fn on_terminal_failure(&self, _state: &TransferState) {}
}

/// Default: nobody to tell.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn noop_hooks_succeed() {
        let hooks = NoopHooks;
        assert!(hooks.pre_transfer().await.is_ok());
        assert!(hooks.post_transfer().await.is_ok());
    }

    #[test]
    fn passthrough_source_returns_input() {
        let staged = PassthroughSource
            .stage(Path::new("/backups/db.tar.zst"))
            .unwrap();
        assert_eq!(staged.path, PathBuf::from("/backups/db.tar.zst"));
        assert!(staged.encryption.is_none());
    }

    #[tokio::test]
    async fn custom_hooks_run_in_order() {
        #[derive(Default)]
        struct Counting {
            pre: AtomicU32,
            post: AtomicU32,
        }
        impl TransferHooks for Counting {
            fn pre_transfer(&self) -> HookFuture<'_> {
                Box::pin(async {
                    self.pre.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }
            fn post_transfer(&self) -> HookFuture<'_> {
                Box::pin(async {
                    self.post.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }
        }

        let hooks = Counting::default();
        hooks.pre_transfer().await.unwrap();
        hooks.post_transfer().await.unwrap();
        assert_eq!(hooks.pre.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.post.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_hook_reports_kind() {
        struct Failing;
        impl TransferHooks for Failing {
            fn pre_transfer(&self) -> HookFuture<'_> {
                Box::pin(async { Err(FailureKind::DiskIo) })
            }
        }
        assert_eq!(
            Failing.pre_transfer().await.unwrap_err(),
            FailureKind::DiskIo
        );
    }
}
