//! Chunked file I/O with digest verification.
//!
//! Splits a source file into a fixed-size chunk plan, reads chunks at
//! arbitrary indices (restartable, for resume and selective re-send),
//! and reassembles them at declared offsets into a staging file that is
//! atomically renamed into place once the whole file verifies.

mod codec;
mod digest;
mod plan;
mod validation;

pub use codec::{ChunkReader, ChunkWriter};
pub use digest::{digest_bytes, digest_file, digest_range, verify_bytes};
pub use plan::{ChunkDescriptor, ChunkStatus, plan_chunks};
pub use validation::validate_relative_path;

/// Default chunk size: 4 MiB.
///
/// Larger chunks reduce per-chunk overhead (digests, acks, syscalls);
/// smaller chunks lose less on a retransmit.
pub const DEFAULT_CHUNK_SIZE: u32 = 4 * 1024 * 1024;

/// Errors produced by the chunk layer.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("checksum mismatch on chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("chunk {index} out of range (plan has {count} chunks)")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("chunk {index} extends past end of file ({offset}+{len} > {size})")]
    RangeOutOfBounds {
        index: u32,
        offset: u64,
        len: u32,
        size: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
