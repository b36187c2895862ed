//! Control message payloads.
//!
//! Each struct is the JSON payload of the correspondingly named frame
//! type. Field names use camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::failure::FailureKind;
use crate::types::{Credentials, FileMetadata, Permissions};

/// Opens a session: sent by the client immediately after connecting
/// (and after TLS negotiation, when enabled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u16,
    pub metadata: FileMetadata,
    /// File identity tag (mtime-derived); resume tokens are only honored
    /// while it matches the tag they were minted under.
    pub content_tag: String,
    /// Present when the client wants to resume an earlier transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    pub accepted: bool,
    pub protocol_version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Credential presentation. Runs exactly once per session, before any
/// chunk frame is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub granted: bool,
    /// Permissions actually granted; meaningful only when `granted`.
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Asks the server for its acked-chunk bitmap for the handshake's
/// resume token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeQuery {
    pub resume_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBitmap {
    /// Indices the server has durably acked. Empty when the token was
    /// unknown or invalidated (the client then restarts from scratch).
    pub acked: Vec<u32>,
    /// False when the token no longer matches the file identity.
    pub valid: bool,
    /// Token to use from here on (a fresh mint when `valid` is false).
    pub resume_token: String,
}

/// Announces the chunk carried by the immediately following
/// `ChunkPayload` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub index: u32,
    pub offset: u64,
    pub len: u32,
    /// Hex digest of the payload under the session's algorithm.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub index: u32,
    /// True when the chunk was verified and durably recorded.
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Client claim that every chunk was acked; carries the whole-file digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complete {
    pub file_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteAck {
    pub ok: bool,
    /// On whole-file mismatch: the chunk indices whose ranges failed
    /// re-verification and must be re-sent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatched: Vec<u32>,
}

/// Terminal error notification, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(flatten)]
    pub kind: FailureKind,
    pub message: String,
}
