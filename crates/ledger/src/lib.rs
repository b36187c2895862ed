//! Durable resume state for interrupted transfers.
//!
//! The ledger records which chunks of a transfer have been acknowledged,
//! keyed by an opaque resume token bound to the source file's identity.
//! Entries are created on the first chunk ack, updated on every ack, and
//! deleted only on completion or explicit abandonment, never on transient
//! failure. That asymmetry is what makes resume possible.
//!
//! All mutation is serialized through a single async lock; concurrent
//! chunk workers reporting acks can never lose updates to the bitmap.

mod entry;
mod identity;
mod store;

pub use entry::LedgerEntry;
pub use identity::FileIdentity;
pub use store::ResumeLedger;

/// Errors produced by the resume ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("entry encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown resume token: {0}")]
    UnknownToken(String),

    #[error("resume token bound to a different file identity")]
    IdentityMismatch,

    #[error("resume token expired")]
    Expired,

    #[error("chunk index {index} out of range (entry has {count} chunks)")]
    IndexOutOfRange { index: u32, count: u32 },
}

/// Generates an opaque 128-bit resume token as lowercase hex.
pub fn generate_token() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
