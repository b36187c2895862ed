use serde::{Deserialize, Serialize};

use crate::ChunkError;

/// Transfer status of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Sent,
    Acked,
    Failed,
}

/// One contiguous byte range of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// 0-based, contiguous.
    pub index: u32,
    pub offset: u64,
    pub len: u32,
    /// Hex digest of the chunk's bytes; empty until first read.
    #[serde(default)]
    pub digest: String,
    pub status: ChunkStatus,
}

/// Builds the ordered chunk plan for a file of `size` bytes.
///
/// Invariants on the result: offsets are contiguous
/// (`offset[i+1] == offset[i] + len[i]`), lengths sum to `size`, and only
/// the last chunk may be shorter than `chunk_size`. A zero-byte file has
/// an empty plan.
pub fn plan_chunks(size: u64, chunk_size: u32) -> Result<Vec<ChunkDescriptor>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize);
    }

    let count = size.div_ceil(chunk_size as u64);
    let mut plan = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for index in 0..count {
        let len = std::cmp::min(chunk_size as u64, size - offset) as u32;
        plan.push(ChunkDescriptor {
            index: index as u32,
            offset,
            len,
            digest: String::new(),
            status: ChunkStatus::Pending,
        });
        offset += len as u64;
    }
    Ok(plan)
}
