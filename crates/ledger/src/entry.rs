use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::FileIdentity;

/// One durable resume record.
///
/// The acked set is ordered so snapshots come out sorted; per-chunk
/// digests are recorded alongside acks so a whole-file mismatch can be
/// narrowed to specific ranges instead of forcing a full restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub session_id: String,
    pub identity: FileIdentity,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub acked: BTreeSet<u32>,
    /// Hex digest of each acked chunk, by index.
    #[serde(default)]
    pub chunk_digests: BTreeMap<u32, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// True once every chunk in the plan has been acked.
    pub fn is_complete(&self) -> bool {
        self.acked.len() as u32 == self.chunk_count
    }

    /// Indices still missing, in order.
    pub fn pending(&self) -> Vec<u32> {
        (0..self.chunk_count)
            .filter(|i| !self.acked.contains(i))
            .collect()
    }

    /// Bytes represented by the acked set, given the plan geometry.
    pub fn acked_bytes(&self) -> u64 {
        let full = self.chunk_size as u64;
        let last_index = self.chunk_count.saturating_sub(1);
        let last_len = if self.chunk_count == 0 {
            0
        } else {
            let tail = self.identity.size - full * last_index as u64;
            if tail == 0 { full } else { tail }
        };
        self.acked
            .iter()
            .map(|&i| if i == last_index { last_len } else { full })
            .sum()
    }
}
