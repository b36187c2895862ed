use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use backhaul_chunk::DEFAULT_CHUNK_SIZE;
use backhaul_protocol::DigestAlgorithm;
use backhaul_resilience::RetryConfig;
use backhaul_transport::TlsServerSettings;

/// Client session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub chunk_size: u32,
    pub algorithm: DigestAlgorithm,
    /// Chunks allowed in flight before waiting on the oldest ack.
    pub pipeline_depth: usize,
    /// Deadline per chunk send/ack. Per operation, never shared.
    pub chunk_deadline: Duration,
    /// Deadline for handshake, negotiation, and completion exchanges.
    pub control_deadline: Duration,
    /// Deadline for pre/post-transfer hooks.
    pub hook_deadline: Duration,
    /// Backoff schedule for reconnect-and-resume attempts.
    pub retry: RetryConfig,
    /// Bounded re-requests for a chunk that keeps failing verification.
    pub max_integrity_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            algorithm: DigestAlgorithm::Sha256,
            pipeline_depth: 4,
            chunk_deadline: Duration::from_secs(60),
            control_deadline: Duration::from_secs(30),
            hook_deadline: Duration::from_secs(120),
            retry: RetryConfig::default(),
            max_integrity_retries: 3,
        }
    }
}

/// Receiving server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
    /// Directory verified files are renamed into.
    pub final_dir: PathBuf,
    /// Directory for durable resume ledger entries.
    pub ledger_dir: PathBuf,
    /// TLS certificate/key; `None` for plain TCP.
    pub tls: Option<TlsServerSettings>,
    pub chunk_deadline: Duration,
    pub control_deadline: Duration,
}

impl ServerConfig {
    pub fn new(final_dir: PathBuf, ledger_dir: PathBuf) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 0).into(),
            final_dir,
            ledger_dir,
            tls: None,
            chunk_deadline: Duration::from_secs(120),
            control_deadline: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_are_sane() {
        let config = SessionConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.pipeline_depth, 4);
        assert!(config.max_integrity_retries > 0);
        assert!(config.chunk_deadline > Duration::ZERO);
    }

    #[test]
    fn server_config_defaults_to_ephemeral_port() {
        let config = ServerConfig::new("/tmp/final".into(), "/tmp/ledger".into());
        assert_eq!(config.bind_addr.port(), 0);
        assert!(config.tls.is_none());
    }
}
