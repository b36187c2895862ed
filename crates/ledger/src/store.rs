use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entry::LedgerEntry;
use crate::identity::FileIdentity;
use crate::{LedgerError, generate_token};

/// Default entry lifetime before a token stops being honored.
const DEFAULT_TTL_DAYS: i64 = 7;

/// Durable, single-writer resume ledger.
///
/// One JSON file per token under the ledger directory, each replaced
/// atomically (write temp, rename). Every mutating call takes the single
/// writer lock, so concurrent ack reports from chunk workers serialize
/// instead of racing.
pub struct ResumeLedger {
    dir: PathBuf,
    ttl: Duration,
    inner: Mutex<HashMap<String, LedgerEntry>>,
}

impl ResumeLedger {
    /// Opens (or creates) the ledger directory and loads live entries.
    ///
    /// Expired entries found on disk are swept immediately.
    pub fn open(dir: &Path) -> Result<Self, LedgerError> {
        Self::with_ttl(dir, Duration::days(DEFAULT_TTL_DAYS))
    }

    /// As [`open`](Self::open), with a custom time-to-live for new entries.
    pub fn with_ttl(dir: &Path, ttl: Duration) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir)?;

        let mut entries = HashMap::new();
        let now = Utc::now();
        for item in std::fs::read_dir(dir)? {
            let path = item?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let entry: LedgerEntry = match std::fs::read_to_string(&path)
                .map_err(LedgerError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(LedgerError::from))
            {
                Ok(e) => e,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable ledger entry");
                    continue;
                }
            };
            let token = match path.file_stem().and_then(|s| s.to_str()) {
                Some(t) => t.to_string(),
                None => continue,
            };
            if entry.expires_at <= now {
                debug!(token, "sweeping expired ledger entry");
                let _ = std::fs::remove_file(&path);
                continue;
            }
            entries.insert(token, entry);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            ttl,
            inner: Mutex::new(entries),
        })
    }

    /// Mints a fresh token bound to `identity` and persists an empty entry.
    pub async fn mint(
        &self,
        session_id: &str,
        identity: FileIdentity,
        chunk_size: u32,
        chunk_count: u32,
    ) -> Result<String, LedgerError> {
        let token = generate_token();
        let now = Utc::now();
        let entry = LedgerEntry {
            session_id: session_id.to_string(),
            identity,
            chunk_size,
            chunk_count,
            acked: Default::default(),
            chunk_digests: Default::default(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let mut inner = self.inner.lock().await;
        persist(&self.dir, &token, &entry)?;
        inner.insert(token.clone(), entry);
        debug!(token, "ledger entry minted");
        Ok(token)
    }

    /// Checks that `token` exists, is unexpired, and is bound to `identity`.
    ///
    /// Returns a snapshot of the entry on success.
    pub async fn validate(
        &self,
        token: &str,
        identity: &FileIdentity,
    ) -> Result<LedgerEntry, LedgerError> {
        let inner = self.inner.lock().await;
        let entry = inner
            .get(token)
            .ok_or_else(|| LedgerError::UnknownToken(token.to_string()))?;
        if entry.expires_at <= Utc::now() {
            return Err(LedgerError::Expired);
        }
        if &entry.identity != identity {
            return Err(LedgerError::IdentityMismatch);
        }
        Ok(entry.clone())
    }

    /// Sorted acked-chunk indices for `token`, if the entry exists.
    pub async fn snapshot(&self, token: &str) -> Option<Vec<u32>> {
        let inner = self.inner.lock().await;
        inner
            .get(token)
            .map(|entry| entry.acked.iter().copied().collect())
    }

    /// A full snapshot of the entry, if it exists.
    pub async fn entry(&self, token: &str) -> Option<LedgerEntry> {
        self.inner.lock().await.get(token).cloned()
    }

    /// Records one acked chunk (with its digest) and persists the entry.
    pub async fn record_ack(
        &self,
        token: &str,
        index: u32,
        digest: &str,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .get_mut(token)
            .ok_or_else(|| LedgerError::UnknownToken(token.to_string()))?;
        if index >= entry.chunk_count {
            return Err(LedgerError::IndexOutOfRange {
                index,
                count: entry.chunk_count,
            });
        }

        entry.acked.insert(index);
        entry.chunk_digests.insert(index, digest.to_string());
        persist(&self.dir, token, entry)?;
        Ok(())
    }

    /// Un-acks the given chunks after a whole-file digest mismatch, so
    /// they get re-sent and re-verified.
    pub async fn clear_acks(&self, token: &str, indices: &[u32]) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .get_mut(token)
            .ok_or_else(|| LedgerError::UnknownToken(token.to_string()))?;
        for index in indices {
            entry.acked.remove(index);
            entry.chunk_digests.remove(index);
        }
        persist(&self.dir, token, entry)?;
        Ok(())
    }

    /// Deletes the entry. Completion or explicit abandonment only.
    ///
    /// Transient failure and cancellation must NOT call this; leaving the
    /// entry in place is what makes the next attempt a resume.
    pub async fn remove(&self, token: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if inner.remove(token).is_some() {
            let path = entry_path(&self.dir, token);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            debug!(token, "ledger entry removed");
        }
        Ok(())
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

fn entry_path(dir: &Path, token: &str) -> PathBuf {
    dir.join(format!("{token}.json"))
}

/// Atomic replace: write to a temp file, then rename over the target.
/// On rename failure the temp file is cleaned up.
fn persist(dir: &Path, token: &str, entry: &LedgerEntry) -> Result<(), LedgerError> {
    let path = entry_path(dir, token);
    let tmp = dir.join(format!("{token}.json.tmp"));

    std::fs::write(&tmp, serde_json::to_vec_pretty(entry)?)?;
    std::fs::rename(&tmp, &path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_identity() -> FileIdentity {
        FileIdentity {
            path: "backup.tar.zst".into(),
            size: 400,
            content_tag: "6893".into(),
        }
    }

    #[tokio::test]
    async fn mint_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();

        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();
        assert_eq!(ledger.snapshot(&token).await.unwrap(), Vec::<u32>::new());

        ledger.record_ack(&token, 2, "d2").await.unwrap();
        ledger.record_ack(&token, 0, "d0").await.unwrap();
        assert_eq!(ledger.snapshot(&token).await.unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn validate_accepts_matching_identity() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();

        let entry = ledger.validate(&token, &sample_identity()).await.unwrap();
        assert_eq!(entry.chunk_count, 4);
    }

    #[tokio::test]
    async fn validate_rejects_changed_identity() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();

        let mut changed = sample_identity();
        changed.content_tag = "7000".into();
        assert!(matches!(
            ledger.validate(&token, &changed).await,
            Err(LedgerError::IdentityMismatch)
        ));
    }

    #[tokio::test]
    async fn validate_rejects_unknown_token() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        assert!(matches!(
            ledger.validate("no-such-token", &sample_identity()).await,
            Err(LedgerError::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn validate_rejects_expired_entry() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::with_ttl(dir.path(), Duration::seconds(-1)).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();
        assert!(matches!(
            ledger.validate(&token, &sample_identity()).await,
            Err(LedgerError::Expired)
        ));
    }

    #[tokio::test]
    async fn record_ack_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();
        assert!(matches!(
            ledger.record_ack(&token, 4, "d").await,
            Err(LedgerError::IndexOutOfRange { index: 4, count: 4 })
        ));
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let token;
        {
            let ledger = ResumeLedger::open(dir.path()).unwrap();
            token = ledger
                .mint("sess-1", sample_identity(), 100, 4)
                .await
                .unwrap();
            ledger.record_ack(&token, 1, "d1").await.unwrap();
            ledger.record_ack(&token, 3, "d3").await.unwrap();
        }

        let reopened = ResumeLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.snapshot(&token).await.unwrap(), vec![1, 3]);
        let entry = reopened.entry(&token).await.unwrap();
        assert_eq!(entry.chunk_digests.get(&3).unwrap(), "d3");
    }

    #[tokio::test]
    async fn expired_entries_swept_on_open() {
        let dir = TempDir::new().unwrap();
        let token;
        {
            let ledger = ResumeLedger::with_ttl(dir.path(), Duration::seconds(-1)).unwrap();
            token = ledger
                .mint("sess-1", sample_identity(), 100, 4)
                .await
                .unwrap();
        }

        let reopened = ResumeLedger::open(dir.path()).unwrap();
        assert!(reopened.entry(&token).await.is_none());
        assert!(reopened.is_empty().await);
    }

    #[tokio::test]
    async fn clear_acks_reopens_chunks() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();
        for i in 0..4 {
            ledger.record_ack(&token, i, &format!("d{i}")).await.unwrap();
        }

        ledger.clear_acks(&token, &[1, 3]).await.unwrap();
        assert_eq!(ledger.snapshot(&token).await.unwrap(), vec![0, 2]);
        let entry = ledger.entry(&token).await.unwrap();
        assert!(!entry.chunk_digests.contains_key(&1));
        assert!(entry.chunk_digests.contains_key(&0));
        assert_eq!(entry.pending(), vec![1, 3]);
    }

    #[tokio::test]
    async fn remove_deletes_entry_and_file() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 4)
            .await
            .unwrap();

        ledger.remove(&token).await.unwrap();
        assert!(ledger.entry(&token).await.is_none());
        assert!(!dir.path().join(format!("{token}.json")).exists());
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::open(dir.path()).unwrap();
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 8)
            .await
            .unwrap();
        for i in 0..8 {
            ledger.record_ack(&token, i, "d").await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn concurrent_acks_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ResumeLedger::open(dir.path()).unwrap());
        let token = ledger
            .mint("sess-1", sample_identity(), 100, 64)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let ledger = Arc::clone(&ledger);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..16u32 {
                    let index = worker * 16 + i;
                    ledger
                        .record_ack(&token, index, &format!("d{index}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let acked = ledger.snapshot(&token).await.unwrap();
        assert_eq!(acked.len(), 64);
        assert_eq!(acked, (0..64).collect::<Vec<u32>>());
    }
}
