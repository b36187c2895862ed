//! Client-role transfer session.
//!
//! Drives one file's transfer: connect, handshake, authenticate,
//! negotiate resume, pipelined chunk loop, whole-file verification.
//! Transient failures tear the connection down and re-enter through the
//! retry policy; resume negotiation makes the reattempt cheap because
//! acked chunks are never re-sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use backhaul_chunk::{ChunkReader, ChunkStatus};
use backhaul_ledger::FileIdentity;
use backhaul_protocol::messages::{
    ChunkAck, ChunkHeader, Complete, CompleteAck, Handshake, HandshakeAck, ResumeBitmap,
    ResumeQuery,
};
use backhaul_protocol::{
    Credentials, FailureKind, FileMetadata, FrameType, PROTOCOL_VERSION, Permissions,
};
use backhaul_resilience::{RecoveryAction, RecoveryPolicy, RetryDecision, RetryPolicy, TimeoutGuard};
use backhaul_transport::{AuthenticationGate, Channel, TlsClientSettings};

use crate::config::SessionConfig;
use crate::exchange::{guarded, recv_expect};
use crate::hooks::{
    NoopHooks, NoopSink, NotificationSink, PassthroughSource, SourceProvider, TransferHooks,
};
use crate::progress::Progress;
use crate::state::{TransferState, TransferStatus};
use crate::SessionError;

enum Outcome {
    Completed,
    Cancelled,
    Failed(FailureKind, String),
}

/// One file's transfer, client role.
pub struct TransferSession {
    endpoint: SocketAddr,
    credentials: Credentials,
    config: SessionConfig,
    tls: Option<TlsClientSettings>,
    cancel: CancellationToken,
    guard: TimeoutGuard,
    recovery: RecoveryPolicy,
    retry: RetryPolicy,
    hooks: Arc<dyn TransferHooks>,
    source: Arc<dyn SourceProvider>,
    notifications: Arc<dyn NotificationSink>,
    progress: Option<mpsc::Sender<Progress>>,
    initial_token: Option<String>,
}

impl TransferSession {
    pub fn new(endpoint: SocketAddr, credentials: Credentials, config: SessionConfig) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            endpoint,
            credentials,
            config,
            tls: None,
            cancel: CancellationToken::new(),
            guard: TimeoutGuard::new(RecoveryPolicy),
            recovery: RecoveryPolicy,
            retry,
            hooks: Arc::new(NoopHooks),
            source: Arc::new(PassthroughSource),
            notifications: Arc::new(NoopSink),
            progress: None,
            initial_token: None,
        }
    }

    /// Enables TLS toward the server.
    pub fn with_tls(mut self, settings: TlsClientSettings) -> Self {
        self.tls = Some(settings);
        self
    }

    /// Installs the pre/post-transfer bracket.
    pub fn with_hooks(mut self, hooks: Arc<dyn TransferHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Installs a compression/encryption source provider.
    pub fn with_source_provider(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.source = source;
        self
    }

    /// Installs the terminal-failure notification sink.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// Registers a progress channel; snapshots are sent non-blocking and
    /// dropped when the receiver lags.
    pub fn with_progress(mut self, tx: mpsc::Sender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Resumes an earlier transfer with its token.
    pub fn with_resume_token(mut self, token: String) -> Self {
        self.initial_token = Some(token);
        self
    }

    /// Token for cooperative cancellation from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the transfer to a terminal state.
    ///
    /// `source` is the local file; `remote_name` the relative destination
    /// path on the server. The returned state carries the resume token on
    /// Failed/Cancelled so a later invocation can pick up where this one
    /// stopped.
    pub async fn run(self, source: &Path, remote_name: &str) -> TransferState {
        // Stage the source (compression/encryption seam).
        let staged = match self.source.stage(source) {
            Ok(staged) => staged,
            Err(kind) => {
                let mut state = TransferState::new(empty_metadata(remote_name));
                state.fail(kind, "source staging failed");
                self.notifications.on_terminal_failure(&state);
                return state;
            }
        };

        let (identity, mut reader, metadata) = match self.open_source(&staged.path, remote_name) {
            Ok(parts) => parts,
            Err(err) => {
                let mut state = TransferState::new(empty_metadata(remote_name));
                state.fail(err.failure_kind(), err.to_string());
                self.notifications.on_terminal_failure(&state);
                return state;
            }
        };

        let mut metadata = metadata;
        metadata.encryption = staged.encryption.clone();
        let mut state = TransferState::new(metadata);
        state.resume_token = self.initial_token.clone();

        info!(
            session = %state.session_id,
            file = %remote_name,
            size = state.metadata.size,
            chunks = state.metadata.chunk_count,
            "transfer session starting"
        );

        // Pre-transfer bracket (database quiesce and friends).
        if let Err(err) = self
            .run_hook("pre-transfer hook", self.hooks.pre_transfer())
            .await
        {
            if err.failure_kind() == FailureKind::Cancelled {
                state.cancel();
            } else {
                state.fail(err.failure_kind(), err.to_string());
                self.notifications.on_terminal_failure(&state);
            }
            return state;
        }

        let outcome = self.drive(&mut state, &identity, &mut reader).await;

        match outcome {
            Outcome::Completed => {
                info!(session = %state.session_id, "transfer completed");
            }
            Outcome::Cancelled => {
                state.cancel();
                info!(session = %state.session_id, "transfer cancelled; resume state kept");
            }
            Outcome::Failed(kind, message) => {
                warn!(session = %state.session_id, kind = %kind, "transfer failed: {message}");
                state.fail(kind, message);
                self.notifications.on_terminal_failure(&state);
            }
        }
        self.emit_progress(&state);

        // Post-transfer bracket runs regardless of outcome; its failure
        // cannot change a terminal state, only get logged.
        if let Err(err) = self
            .run_hook("post-transfer hook", self.hooks.post_transfer())
            .await
        {
            warn!(session = %state.session_id, error = %err, "post-transfer hook failed");
        }

        state
    }

    /// The retry-governed attempt loop.
    async fn drive(
        &self,
        state: &mut TransferState,
        identity: &FileIdentity,
        reader: &mut ChunkReader,
    ) -> Outcome {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            match self.attempt(state, identity, reader).await {
                Ok(()) => return Outcome::Completed,
                Err(err) => {
                    let kind = err.failure_kind();
                    if kind == FailureKind::Cancelled {
                        return Outcome::Cancelled;
                    }
                    // Integrity failures surface here only after their own
                    // bounded re-send loops ran dry; reconnecting cannot
                    // produce different bytes.
                    if matches!(
                        kind,
                        FailureKind::ChunkIntegrity { .. } | FailureKind::WholeFileIntegrity
                    ) {
                        return Outcome::Failed(kind, err.to_string());
                    }
                    match self.recovery.decide(&kind) {
                        RecoveryAction::Retry => match self.retry.next_delay(attempt, &kind) {
                            RetryDecision::RetryAfter(delay) => {
                                warn!(
                                    session = %state.session_id,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    kind = %kind,
                                    "transient failure; retrying"
                                );
                                tokio::select! {
                                    biased;
                                    _ = self.cancel.cancelled() => return Outcome::Cancelled,
                                    _ = tokio::time::sleep(delay) => {}
                                }
                                attempt += 1;
                            }
                            RetryDecision::GiveUp => {
                                return Outcome::Failed(kind, err.to_string());
                            }
                        },
                        RecoveryAction::Abort | RecoveryAction::Escalate => {
                            return Outcome::Failed(kind, err.to_string());
                        }
                    }
                }
            }
        }
    }

    /// One full connection attempt: handshake through completion.
    async fn attempt(
        &self,
        state: &mut TransferState,
        identity: &FileIdentity,
        reader: &mut ChunkReader,
    ) -> Result<(), SessionError> {
        self.advance(state, TransferStatus::Connecting);
        let mut channel = Channel::connect(self.endpoint, self.tls.as_ref(), &self.cancel).await?;

        // Handshake.
        let handshake = Handshake {
            protocol_version: PROTOCOL_VERSION,
            metadata: state.metadata.clone(),
            content_tag: identity.content_tag.clone(),
            resume_token: state.resume_token.clone(),
        };
        let ack: HandshakeAck = guarded(
            &self.guard,
            &self.cancel,
            "handshake",
            self.config.control_deadline,
            async {
                channel
                    .send_control(FrameType::Handshake, &handshake)
                    .await?;
                recv_expect(&mut channel, FrameType::HandshakeAck).await
            },
        )
        .await?;
        if !ack.accepted {
            return Err(SessionError::failure(
                FailureKind::Protocol,
                ack.message
                    .unwrap_or_else(|| "handshake rejected".to_string()),
            ));
        }

        // Authentication gate; rejection is fatal and never retried.
        self.advance(state, TransferStatus::Authenticating);
        let context = AuthenticationGate::authenticate(&mut channel, &self.credentials).await?;
        if !context.permissions.covers(&Permissions::write_only()) {
            return Err(SessionError::failure(
                FailureKind::PermissionDenied,
                "server did not grant write permission",
            ));
        }

        // Resume negotiation.
        self.advance(state, TransferStatus::Negotiating);
        let query = ResumeQuery {
            resume_token: state.resume_token.clone().unwrap_or_default(),
        };
        let bitmap: ResumeBitmap = guarded(
            &self.guard,
            &self.cancel,
            "resume negotiation",
            self.config.control_deadline,
            async {
                channel.send_control(FrameType::ResumeQuery, &query).await?;
                recv_expect(&mut channel, FrameType::ResumeBitmap).await
            },
        )
        .await?;

        if !bitmap.valid && state.resume_token.is_some() {
            warn!(
                session = %state.session_id,
                "resume token no longer valid; restarting from scratch"
            );
        }
        state.resume_token = Some(bitmap.resume_token.clone());

        let acked: HashSet<u32> = bitmap.acked.iter().copied().collect();
        let pending: Vec<u32> = (0..state.metadata.chunk_count)
            .filter(|i| !acked.contains(i))
            .collect();

        // Confirmed bytes so far, resumed chunks included.
        state.bytes_transferred = acked
            .iter()
            .filter_map(|&i| reader.plan().get(i as usize))
            .map(|d| d.len as u64)
            .sum();
        for &index in &acked {
            reader.set_status(index, ChunkStatus::Acked);
        }
        debug!(
            session = %state.session_id,
            acked = acked.len(),
            pending = pending.len(),
            "resume negotiation done"
        );

        // Chunk loop.
        self.advance(state, TransferStatus::Transferring);
        self.send_chunks(state, reader, &mut channel, pending).await?;

        // Whole-file verification, re-sending flagged ranges on mismatch.
        self.advance(state, TransferStatus::Verifying);
        let mut verify_rounds: u32 = 0;
        loop {
            let file_digest = reader.file_digest()?;
            let complete_ack: CompleteAck = guarded(
                &self.guard,
                &self.cancel,
                "complete exchange",
                self.config.control_deadline,
                async {
                    channel
                        .send_control(
                            FrameType::Complete,
                            &Complete {
                                file_digest: file_digest.clone(),
                            },
                        )
                        .await?;
                    recv_expect(&mut channel, FrameType::CompleteAck).await
                },
            )
            .await?;

            if complete_ack.ok {
                state.metadata.file_digest = Some(file_digest);
                self.advance(state, TransferStatus::Completed);
                let _ = channel.shutdown().await;
                return Ok(());
            }

            verify_rounds += 1;
            if complete_ack.mismatched.is_empty()
                || verify_rounds > self.config.max_integrity_retries
            {
                return Err(SessionError::failure(
                    FailureKind::WholeFileIntegrity,
                    "whole-file digest mismatch persisted after re-sends",
                ));
            }

            warn!(
                session = %state.session_id,
                mismatched = ?complete_ack.mismatched,
                "whole-file digest mismatch; re-sending flagged chunks"
            );
            self.advance(state, TransferStatus::Transferring);
            self.send_chunks(state, reader, &mut channel, complete_ack.mismatched)
                .await?;
            self.advance(state, TransferStatus::Verifying);
        }
    }

    /// Pipelined chunk send loop over one connection.
    ///
    /// Up to `pipeline_depth` chunks ride unacked; each in-flight chunk
    /// has its own deadline. A verification nack re-queues exactly that
    /// chunk, bounded by `max_integrity_retries`.
    async fn send_chunks(
        &self,
        state: &mut TransferState,
        reader: &mut ChunkReader,
        channel: &mut Channel,
        indices: Vec<u32>,
    ) -> Result<(), SessionError> {
        let depth = self.config.pipeline_depth.max(1);
        let mut queue: VecDeque<u32> = indices.into();
        let mut in_flight: VecDeque<(u32, u32)> = VecDeque::new();
        let mut integrity_retries: HashMap<u32, u32> = HashMap::new();

        while !queue.is_empty() || !in_flight.is_empty() {
            // Fill the window.
            while in_flight.len() < depth {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                let (desc, bytes) = reader.read(index)?;
                let header = ChunkHeader {
                    index,
                    offset: desc.offset,
                    len: desc.len,
                    digest: desc.digest.clone(),
                };
                guarded(
                    &self.guard,
                    &self.cancel,
                    &format!("chunk {index} send"),
                    self.config.chunk_deadline,
                    async {
                        channel.send_chunk(&header, bytes).await?;
                        Ok(())
                    },
                )
                .await?;
                reader.set_status(index, ChunkStatus::Sent);
                in_flight.push_back((index, desc.len));
                debug!(session = %state.session_id, index, "chunk sent");
            }

            // Acks come back in send order.
            let Some(&(expected_index, len)) = in_flight.front() else {
                break;
            };
            let ack: ChunkAck = guarded(
                &self.guard,
                &self.cancel,
                &format!("chunk {expected_index} ack"),
                self.config.chunk_deadline,
                recv_expect(channel, FrameType::ChunkAck),
            )
            .await?;
            if ack.index != expected_index {
                return Err(SessionError::failure(
                    FailureKind::Protocol,
                    format!("ack for chunk {} while {expected_index} was oldest in flight", ack.index),
                ));
            }
            in_flight.pop_front();

            if ack.ok {
                reader.set_status(expected_index, ChunkStatus::Acked);
                state.bytes_transferred += len as u64;
                self.emit_progress(state);
            } else {
                reader.set_status(expected_index, ChunkStatus::Failed);
                let retries = integrity_retries.entry(expected_index).or_insert(0);
                *retries += 1;
                if *retries > self.config.max_integrity_retries {
                    return Err(SessionError::failure(
                        FailureKind::ChunkIntegrity {
                            index: expected_index,
                        },
                        format!("chunk {expected_index} failed verification {retries} times"),
                    ));
                }
                warn!(
                    session = %state.session_id,
                    index = expected_index,
                    retries = *retries,
                    "chunk verification failed; re-sending only that chunk"
                );
                queue.push_front(expected_index);
            }
        }
        Ok(())
    }

    fn open_source(
        &self,
        staged: &Path,
        remote_name: &str,
    ) -> Result<(FileIdentity, ChunkReader, FileMetadata), SessionError> {
        let identity = FileIdentity::of_file(remote_name, staged)
            .map_err(|e| SessionError::failure(FailureKind::DiskIo, e.to_string()))?;
        let reader = ChunkReader::open(staged, self.config.chunk_size, self.config.algorithm)?;
        let metadata = FileMetadata {
            name: remote_name.to_string(),
            size: reader.size(),
            chunk_size: self.config.chunk_size,
            chunk_count: reader.chunk_count(),
            algorithm: self.config.algorithm,
            file_digest: None,
            encryption: None,
        };
        Ok((identity, reader, metadata))
    }

    async fn run_hook(&self, label: &str, future: crate::hooks::HookFuture<'_>) -> Result<(), SessionError> {
        guarded(
            &self.guard,
            &self.cancel,
            label,
            self.config.hook_deadline,
            async move {
                future
                    .await
                    .map_err(|kind| SessionError::Failure {
                        message: format!("{label} reported {kind}"),
                        kind,
                    })
            },
        )
        .await
    }

    /// Moves the machine forward, silently skipping transitions the
    /// reconnect path would otherwise replay.
    fn advance(&self, state: &mut TransferState, to: TransferStatus) {
        if state.status != to && TransferState::is_legal(state.status, to) {
            state.transition(to);
            self.emit_progress(state);
        }
    }

    fn emit_progress(&self, state: &TransferState) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(Progress::of(state));
        }
    }
}

fn empty_metadata(remote_name: &str) -> FileMetadata {
    FileMetadata {
        name: remote_name.to_string(),
        size: 0,
        chunk_size: 0,
        chunk_count: 0,
        algorithm: Default::default(),
        file_digest: None,
        encryption: None,
    }
}
