//! Receiving server: accept loop plus the server-role session.
//!
//! One task per accepted connection. Chunks land in a `.part` staging
//! file at their declared offsets; only after the whole file verifies is
//! the staging file atomically renamed into the destination directory,
//! so a crash mid-transfer never leaves a partial file at the final path.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use backhaul_chunk::{
    ChunkDescriptor, ChunkError, ChunkStatus, ChunkWriter, validate_relative_path,
};
use backhaul_ledger::{FileIdentity, LedgerEntry, ResumeLedger};
use backhaul_protocol::messages::{
    ChunkAck, ChunkHeader, Complete, CompleteAck, ErrorMessage, Handshake, HandshakeAck,
    ResumeQuery, ResumeBitmap,
};
use backhaul_protocol::{
    FailureKind, FileMetadata, FrameType, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION, Permissions,
};
use backhaul_resilience::{RecoveryPolicy, TimeoutGuard};
use backhaul_transport::{AuthenticationGate, Channel, CredentialStore, TlsAcceptor, TransportError};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::exchange::{guarded, recv_any, recv_expect};
use crate::SessionError;

/// The receiving server.
pub struct TransferServer {
    config: ServerConfig,
    credentials: CredentialStore,
    ledger: Arc<ResumeLedger>,
    guard: TimeoutGuard,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TransferServer {
    /// Creates the server, opening (or resuming) its resume ledger.
    pub fn new(config: ServerConfig, credentials: CredentialStore) -> Result<Arc<Self>, SessionError> {
        std::fs::create_dir_all(&config.final_dir)
            .map_err(|e| SessionError::failure(FailureKind::DiskIo, e.to_string()))?;
        let ledger = Arc::new(ResumeLedger::open(&config.ledger_dir)?);
        Ok(Arc::new(Self {
            config,
            credentials,
            ledger,
            guard: TimeoutGuard::new(RecoveryPolicy),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        }))
    }

    /// Address actually bound; available once [`run`](Self::run) started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Token other tasks can use to observe shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests a graceful shutdown; in-flight sessions unwind with
    /// their ledger entries and staging files intact.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accept loop; runs until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), SessionError> {
        let acceptor = match &self.config.tls {
            Some(settings) => Some(settings.acceptor()?),
            None => None,
        };

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        *self.local_addr.lock().await = Some(local_addr);
        info!(%local_addr, tls = acceptor.is_some(), "transfer server listening");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("transfer server shutting down");
                    break Ok(());
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(self);
                            let acceptor = acceptor.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer, acceptor).await {
                                    warn!(%peer, error = %e, "session ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    /// One server-role session, handshake through completion.
    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<(), SessionError> {
        let mut channel = Channel::accept(stream, acceptor.as_ref(), &self.cancel).await?;
        let session_id = Uuid::new_v4().to_string();
        debug!(session = %session_id, %peer, "connection accepted");

        // Handshake: version, path safety, plan geometry.
        let handshake: Handshake = guarded(
            &self.guard,
            &self.cancel,
            "handshake recv",
            self.config.control_deadline,
            recv_expect(&mut channel, FrameType::Handshake),
        )
        .await?;

        if let Err(reject) = validate_handshake(&handshake) {
            channel
                .send_control(
                    FrameType::HandshakeAck,
                    &HandshakeAck {
                        accepted: false,
                        protocol_version: PROTOCOL_VERSION,
                        message: Some(reject.clone()),
                    },
                )
                .await?;
            return Err(SessionError::failure(FailureKind::Protocol, reject));
        }
        channel
            .send_control(
                FrameType::HandshakeAck,
                &HandshakeAck {
                    accepted: true,
                    protocol_version: PROTOCOL_VERSION,
                    message: None,
                },
            )
            .await?;

        // Authentication gate: runs once, before any chunk frame.
        let context = AuthenticationGate::verify(&mut channel, &self.credentials).await?;

        // Resume negotiation against our ledger.
        let query: ResumeQuery = guarded(
            &self.guard,
            &self.cancel,
            "resume query recv",
            self.config.control_deadline,
            recv_expect(&mut channel, FrameType::ResumeQuery),
        )
        .await?;

        let identity = FileIdentity {
            path: handshake.metadata.name.clone(),
            size: handshake.metadata.size,
            content_tag: handshake.content_tag.clone(),
        };
        let (token, acked, honored) = self
            .negotiate(&session_id, &query.resume_token, identity, &handshake.metadata)
            .await?;
        channel
            .send_control(
                FrameType::ResumeBitmap,
                &ResumeBitmap {
                    acked: acked.clone(),
                    valid: honored,
                    resume_token: token.clone(),
                },
            )
            .await?;
        info!(
            session = %session_id,
            file = %handshake.metadata.name,
            resumed_chunks = acked.len(),
            "session negotiated"
        );

        // Chunk receive loop.
        let final_path = self.config.final_dir.join(&handshake.metadata.name);
        let mut writer = ChunkWriter::create(&final_path, handshake.metadata.algorithm)?;
        let write_permission = Permissions::write_only();

        loop {
            let frame = guarded(
                &self.guard,
                &self.cancel,
                "chunk recv",
                self.config.chunk_deadline,
                recv_any(&mut channel),
            )
            .await?;

            match frame.frame_type {
                FrameType::ChunkHeader => {
                    let header: ChunkHeader = frame.parse()?;
                    if !context.allows(&write_permission) {
                        let message = format!(
                            "client {} lacks write permission",
                            context.client_id
                        );
                        send_error(&mut channel, FailureKind::PermissionDenied, &message).await;
                        return Err(SessionError::failure(
                            FailureKind::PermissionDenied,
                            message,
                        ));
                    }

                    let payload = guarded(
                        &self.guard,
                        &self.cancel,
                        "chunk payload recv",
                        self.config.chunk_deadline,
                        recv_any(&mut channel),
                    )
                    .await?;
                    if payload.frame_type != FrameType::ChunkPayload
                        || payload.payload.len() != header.len as usize
                    {
                        let message = format!(
                            "chunk {} payload did not match its header",
                            header.index
                        );
                        send_error(&mut channel, FailureKind::Protocol, &message).await;
                        return Err(SessionError::failure(FailureKind::Protocol, message));
                    }

                    match writer.write_chunk(
                        header.index,
                        header.offset,
                        &header.digest,
                        &payload.payload,
                    ) {
                        Ok(()) => {
                            self.ledger
                                .record_ack(&token, header.index, &header.digest)
                                .await?;
                            channel
                                .send_control(
                                    FrameType::ChunkAck,
                                    &ChunkAck {
                                        index: header.index,
                                        ok: true,
                                        message: None,
                                    },
                                )
                                .await?;
                        }
                        Err(ChunkError::ChecksumMismatch { index }) => {
                            warn!(session = %session_id, index, "chunk digest mismatch; requesting re-send");
                            channel
                                .send_control(
                                    FrameType::ChunkAck,
                                    &ChunkAck {
                                        index,
                                        ok: false,
                                        message: Some("digest mismatch".into()),
                                    },
                                )
                                .await?;
                        }
                        Err(e) => {
                            send_error(&mut channel, FailureKind::DiskIo, &e.to_string()).await;
                            return Err(e.into());
                        }
                    }
                }

                FrameType::Complete => {
                    let complete: Complete = frame.parse()?;
                    let staged = writer.staged_digest()?;
                    if staged == complete.file_digest {
                        writer.finalize()?;
                        self.ledger.remove(&token).await?;
                        channel
                            .send_control(
                                FrameType::CompleteAck,
                                &CompleteAck {
                                    ok: true,
                                    mismatched: vec![],
                                },
                            )
                            .await?;
                        info!(
                            session = %session_id,
                            file = %handshake.metadata.name,
                            "transfer complete; file promoted"
                        );
                        return Ok(());
                    }

                    // Narrow the damage: re-verify recorded chunk ranges
                    // and un-ack only the offenders.
                    let entry = self.ledger.entry(&token).await.ok_or_else(|| {
                        SessionError::failure(
                            FailureKind::ResumeTokenInvalid,
                            "ledger entry vanished mid-session",
                        )
                    })?;
                    let recorded = descriptors_from_entry(&entry, &handshake.metadata);
                    let mismatched = writer.verify_ranges(&recorded)?;
                    warn!(
                        session = %session_id,
                        expected = %complete.file_digest,
                        actual = %staged,
                        mismatched = ?mismatched,
                        "whole-file digest mismatch"
                    );
                    // Finalize was not reached; the staging file stays put
                    // and the re-sent ranges overwrite in place.
                    self.ledger.clear_acks(&token, &mismatched).await?;
                    channel
                        .send_control(
                            FrameType::CompleteAck,
                            &CompleteAck {
                                ok: false,
                                mismatched,
                            },
                        )
                        .await?;
                }

                other => {
                    let message = format!("unexpected frame {other:?} during transfer");
                    send_error(&mut channel, FailureKind::Protocol, &message).await;
                    return Err(SessionError::failure(FailureKind::Protocol, message));
                }
            }
        }
    }

    /// Resume negotiation: honor a valid supplied token, otherwise mint
    /// a fresh entry. Returns (token, acked indices, supplied-token-honored).
    async fn negotiate(
        &self,
        session_id: &str,
        supplied: &str,
        identity: FileIdentity,
        metadata: &FileMetadata,
    ) -> Result<(String, Vec<u32>, bool), SessionError> {
        if !supplied.is_empty() {
            match self.ledger.validate(supplied, &identity).await {
                Ok(entry) if entry.chunk_size == metadata.chunk_size => {
                    let acked = entry.acked.iter().copied().collect();
                    return Ok((supplied.to_string(), acked, true));
                }
                Ok(_) => {
                    warn!(session = %session_id, "resume token minted under a different chunk size");
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "resume token rejected");
                }
            }
            // A rejected token's entry can never be resumed; drop it.
            self.ledger.remove(supplied).await?;
        }

        let token = self
            .ledger
            .mint(session_id, identity, metadata.chunk_size, metadata.chunk_count)
            .await?;
        Ok((token, Vec::new(), supplied.is_empty()))
    }
}

/// Handshake sanity: version, destination path, plan geometry.
fn validate_handshake(handshake: &Handshake) -> Result<(), String> {
    if handshake.protocol_version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {} (want {PROTOCOL_VERSION})",
            handshake.protocol_version
        ));
    }
    if let Err(e) = validate_relative_path(&handshake.metadata.name) {
        return Err(e.to_string());
    }
    let metadata = &handshake.metadata;
    if metadata.chunk_size == 0 {
        return Err("chunk size must be greater than zero".into());
    }
    if metadata.chunk_size as usize > MAX_PAYLOAD_SIZE - 1024 {
        return Err(format!("chunk size {} exceeds frame limit", metadata.chunk_size));
    }
    let expected = FileMetadata::expected_chunks(metadata.size, metadata.chunk_size);
    if metadata.chunk_count != expected {
        return Err(format!(
            "chunk count {} does not match size/chunk_size (want {expected})",
            metadata.chunk_count
        ));
    }
    Ok(())
}

/// Rebuilds chunk descriptors for the acked set from ledger records.
fn descriptors_from_entry(entry: &LedgerEntry, metadata: &FileMetadata) -> Vec<ChunkDescriptor> {
    entry
        .acked
        .iter()
        .map(|&index| {
            let offset = index as u64 * metadata.chunk_size as u64;
            let len = std::cmp::min(metadata.chunk_size as u64, metadata.size - offset) as u32;
            ChunkDescriptor {
                index,
                offset,
                len,
                digest: entry.chunk_digests.get(&index).cloned().unwrap_or_default(),
                status: ChunkStatus::Acked,
            }
        })
        .collect()
}

/// Best-effort terminal error notification; the session is ending anyway.
async fn send_error(channel: &mut Channel, kind: FailureKind, message: &str) {
    let _ = channel
        .send_control(
            FrameType::Error,
            &ErrorMessage {
                kind,
                message: message.to_string(),
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_protocol::DigestAlgorithm;
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_metadata(size: u64, chunk_size: u32) -> FileMetadata {
        FileMetadata {
            name: "backup.tar".into(),
            size,
            chunk_size,
            chunk_count: FileMetadata::expected_chunks(size, chunk_size),
            algorithm: DigestAlgorithm::Sha256,
            file_digest: None,
            encryption: None,
        }
    }

    fn sample_handshake(metadata: FileMetadata) -> Handshake {
        Handshake {
            protocol_version: PROTOCOL_VERSION,
            metadata,
            content_tag: "6893".into(),
            resume_token: None,
        }
    }

    #[test]
    fn handshake_accepts_valid() {
        let hs = sample_handshake(sample_metadata(1000, 100));
        assert!(validate_handshake(&hs).is_ok());
    }

    #[test]
    fn handshake_rejects_version_mismatch() {
        let mut hs = sample_handshake(sample_metadata(1000, 100));
        hs.protocol_version = 99;
        assert!(validate_handshake(&hs).unwrap_err().contains("version"));
    }

    #[test]
    fn handshake_rejects_traversal_path() {
        let mut hs = sample_handshake(sample_metadata(1000, 100));
        hs.metadata.name = "../../etc/shadow".into();
        assert!(validate_handshake(&hs).is_err());
    }

    #[test]
    fn handshake_rejects_bad_geometry() {
        let mut hs = sample_handshake(sample_metadata(1000, 100));
        hs.metadata.chunk_count = 3;
        assert!(validate_handshake(&hs).unwrap_err().contains("chunk count"));

        let mut hs = sample_handshake(sample_metadata(1000, 100));
        hs.metadata.chunk_size = 0;
        assert!(validate_handshake(&hs).is_err());
    }

    #[test]
    fn descriptors_rebuilt_with_short_tail() {
        let metadata = sample_metadata(250, 100);
        let mut acked = BTreeSet::new();
        acked.insert(0);
        acked.insert(2);
        let mut chunk_digests = BTreeMap::new();
        chunk_digests.insert(0u32, "d0".to_string());
        chunk_digests.insert(2u32, "d2".to_string());
        let entry = LedgerEntry {
            session_id: "s".into(),
            identity: FileIdentity {
                path: "backup.tar".into(),
                size: 250,
                content_tag: "t".into(),
            },
            chunk_size: 100,
            chunk_count: 3,
            acked,
            chunk_digests,
            created_at: chrono_now(),
            expires_at: chrono_now(),
        };

        let descs = descriptors_from_entry(&entry, &metadata);
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].index, 0);
        assert_eq!(descs[0].len, 100);
        assert_eq!(descs[1].index, 2);
        assert_eq!(descs[1].offset, 200);
        assert_eq!(descs[1].len, 50);
        assert_eq!(descs[1].digest, "d2");
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
