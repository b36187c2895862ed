//! Binary frame codec.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes BE: payload_len]
//! [1 byte: frame_type]
//! [payload_len bytes: payload]
//! ```
//!
//! Control frames carry JSON payloads (see [`crate::messages`]);
//! `ChunkPayload` frames carry raw chunk bytes and must immediately
//! follow their `ChunkHeader` frame.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{MAX_PAYLOAD_SIZE, ProtocolError};

/// Frame type tag, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Auth = 0x03,
    AuthResult = 0x04,
    ResumeQuery = 0x05,
    ResumeBitmap = 0x06,
    ChunkHeader = 0x07,
    ChunkPayload = 0x08,
    ChunkAck = 0x09,
    Complete = 0x0a,
    CompleteAck = 0x0b,
    Error = 0x0c,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x01 => Ok(FrameType::Handshake),
            0x02 => Ok(FrameType::HandshakeAck),
            0x03 => Ok(FrameType::Auth),
            0x04 => Ok(FrameType::AuthResult),
            0x05 => Ok(FrameType::ResumeQuery),
            0x06 => Ok(FrameType::ResumeBitmap),
            0x07 => Ok(FrameType::ChunkHeader),
            0x08 => Ok(FrameType::ChunkPayload),
            0x09 => Ok(FrameType::ChunkAck),
            0x0a => Ok(FrameType::Complete),
            0x0b => Ok(FrameType::CompleteAck),
            0x0c => Ok(FrameType::Error),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

/// A decoded frame: type tag plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a control frame with a JSON-encoded payload.
    pub fn control<T: Serialize>(frame_type: FrameType, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            frame_type,
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// Builds a raw chunk payload frame.
    pub fn chunk_payload(bytes: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::ChunkPayload,
            payload: bytes,
        }
    }

    /// Decodes the JSON payload into the given type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decodes the payload, insisting on a specific frame type first.
    pub fn expect<T: DeserializeOwned>(&self, expected: FrameType) -> Result<T, ProtocolError> {
        if self.frame_type != expected {
            return Err(ProtocolError::UnexpectedFrame {
                expected: type_name(expected),
                actual: self.frame_type,
            });
        }
        self.parse()
    }
}

fn type_name(frame_type: FrameType) -> &'static str {
    match frame_type {
        FrameType::Handshake => "Handshake",
        FrameType::HandshakeAck => "HandshakeAck",
        FrameType::Auth => "Auth",
        FrameType::AuthResult => "AuthResult",
        FrameType::ResumeQuery => "ResumeQuery",
        FrameType::ResumeBitmap => "ResumeBitmap",
        FrameType::ChunkHeader => "ChunkHeader",
        FrameType::ChunkPayload => "ChunkPayload",
        FrameType::ChunkAck => "ChunkAck",
        FrameType::Complete => "Complete",
        FrameType::CompleteAck => "CompleteAck",
        FrameType::Error => "Error",
    }
}

/// Writes one frame. Does not flush; the caller batches and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let len = frame.payload.len();
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    writer.write_u32(len as u32).await?;
    writer.write_u8(frame.frame_type as u8).await?;
    writer.write_all(&frame.payload).await?;
    Ok(())
}

/// Reads one frame.
///
/// The declared length is validated against [`MAX_PAYLOAD_SIZE`] before
/// the payload buffer is allocated.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let type_byte = reader.read_u8().await?;
    let frame_type = FrameType::try_from(type_byte)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        frame_type,
        payload,
    })
}
