//! Wire protocol for Backhaul transfers.
//!
//! Control messages travel as JSON payloads inside length-prefixed,
//! type-tagged binary frames; chunk data travels as raw bytes in
//! [`FrameType::ChunkPayload`] frames. See [`frame`] for the byte layout.

pub mod failure;
pub mod frame;
pub mod messages;
pub mod types;

pub use failure::FailureKind;
pub use frame::{Frame, FrameType, read_frame, write_frame};
pub use types::{Credentials, DigestAlgorithm, EncryptionMetadata, FileMetadata, Permissions};

/// Protocol version negotiated in the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum accepted frame payload: the largest supported chunk plus
/// headroom for the JSON control envelope around non-chunk frames.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024 + 1024;

/// Errors produced by the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("frame payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unexpected frame: expected {expected}, got {actual:?}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: FrameType,
    },
}
