use serde::{Deserialize, Serialize};

/// Digest algorithm used for chunk and whole-file verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, hex encoded. The default.
    Sha256,
    /// CRC32, hex encoded. Fast, for trusted links where corruption is
    /// the only concern.
    Crc32,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        DigestAlgorithm::Sha256
    }
}

/// Metadata for encrypted source streams, produced by the encryption
/// collaborator and carried opaquely alongside the file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    pub scheme: String,
    /// Hex-encoded initialization vector.
    pub iv: String,
    /// Hex-encoded key-derivation salt.
    pub salt: String,
}

/// Immutable description of the file a session transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Relative destination path (validated server-side before any I/O).
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Chunk size in bytes; the last chunk may be shorter.
    pub chunk_size: u32,
    /// Number of chunks in the plan.
    pub chunk_count: u32,
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
    /// Whole-file digest, populated only after verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionMetadata>,
}

impl FileMetadata {
    /// Number of chunks a file of `size` bytes needs at `chunk_size`.
    pub fn expected_chunks(size: u64, chunk_size: u32) -> u32 {
        if size == 0 {
            return 0;
        }
        size.div_ceil(chunk_size as u64) as u32
    }
}

/// Permission set granted to an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const fn write_only() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    /// True if every permission in `requested` is also granted here.
    pub fn covers(&self, requested: &Permissions) -> bool {
        (!requested.read || self.read) && (!requested.write || self.write)
    }
}

/// Client credentials presented to the authentication gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub secret: String,
    /// Permissions the client is asking for.
    pub permissions: Permissions,
}
