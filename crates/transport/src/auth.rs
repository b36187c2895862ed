//! Authentication gate.
//!
//! Runs exactly once per session, before any chunk frame is accepted.
//! Rejection is fatal by design: retrying a rejected credential changes
//! nothing, so the gate's errors classify as `Authentication` and never
//! reach the retry policy.

use std::collections::HashMap;

use rand::Rng;
use tracing::{info, warn};

use backhaul_protocol::messages::{Auth, AuthResult};
use backhaul_protocol::{Credentials, FrameType, Permissions};

use crate::channel::Channel;
use crate::{AUTH_TIMEOUT, TransportError};

/// Permissions granted to an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub client_id: String,
    pub permissions: Permissions,
}

impl AuthorizationContext {
    /// True if this context authorizes everything in `requested`.
    pub fn allows(&self, requested: &Permissions) -> bool {
        self.permissions.covers(requested)
    }
}

struct StoredClient {
    secret: String,
    permissions: Permissions,
}

/// Server-side credential registry.
#[derive(Default)]
pub struct CredentialStore {
    clients: HashMap<String, StoredClient>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a client's secret and permission ceiling.
    pub fn insert(&mut self, client_id: &str, secret: &str, permissions: Permissions) {
        self.clients.insert(
            client_id.to_string(),
            StoredClient {
                secret: secret.to_string(),
                permissions,
            },
        );
    }

    /// Verifies credentials; on success grants the intersection of the
    /// requested permissions and the client's ceiling.
    pub fn verify(&self, credentials: &Credentials) -> Option<AuthorizationContext> {
        let stored = self.clients.get(&credentials.client_id)?;
        if !constant_time_eq(&stored.secret, &credentials.secret) {
            return None;
        }
        let granted = Permissions {
            read: credentials.permissions.read && stored.permissions.read,
            write: credentials.permissions.write && stored.permissions.write,
        };
        Some(AuthorizationContext {
            client_id: credentials.client_id.clone(),
            permissions: granted,
        })
    }
}

/// Generates a CSPRNG client secret as a 32-character hex string.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string comparison, length-safe.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The credential exchange, both halves.
pub struct AuthenticationGate;

impl AuthenticationGate {
    /// Client half: presents credentials, waits for the verdict.
    pub async fn authenticate(
        channel: &mut Channel,
        credentials: &Credentials,
    ) -> Result<AuthorizationContext, TransportError> {
        channel
            .send_control(
                FrameType::Auth,
                &Auth {
                    credentials: credentials.clone(),
                },
            )
            .await?;

        let frame = tokio::time::timeout(AUTH_TIMEOUT, channel.recv())
            .await
            .map_err(|_| TransportError::Timeout)??;
        let result: AuthResult = frame.expect(FrameType::AuthResult)?;

        if !result.granted {
            return Err(TransportError::AuthRejected(
                result.message.unwrap_or_else(|| "credentials rejected".into()),
            ));
        }

        info!(client = %credentials.client_id, "authenticated");
        Ok(AuthorizationContext {
            client_id: credentials.client_id.clone(),
            permissions: result.permissions,
        })
    }

    /// Server half: receives credentials, verifies against the store,
    /// answers, and returns the granted context.
    pub async fn verify(
        channel: &mut Channel,
        store: &CredentialStore,
    ) -> Result<AuthorizationContext, TransportError> {
        let frame = tokio::time::timeout(AUTH_TIMEOUT, channel.recv())
            .await
            .map_err(|_| TransportError::Timeout)??;
        let auth: Auth = frame.expect(FrameType::Auth)?;

        match store.verify(&auth.credentials) {
            Some(context) => {
                channel
                    .send_control(
                        FrameType::AuthResult,
                        &AuthResult {
                            granted: true,
                            permissions: context.permissions,
                            message: None,
                        },
                    )
                    .await?;
                info!(client = %context.client_id, "client authenticated");
                Ok(context)
            }
            None => {
                warn!(client = %auth.credentials.client_id, peer = %channel.peer(), "authentication rejected");
                channel
                    .send_control(
                        FrameType::AuthResult,
                        &AuthResult {
                            granted: false,
                            permissions: Permissions::default(),
                            message: Some("unknown client or bad secret".into()),
                        },
                    )
                    .await?;
                Err(TransportError::AuthRejected(
                    "unknown client or bad secret".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn store_with(client_id: &str, secret: &str, permissions: Permissions) -> CredentialStore {
        let mut store = CredentialStore::new();
        store.insert(client_id, secret, permissions);
        store
    }

    async fn loopback_pair() -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            Channel::accept(tcp, None, &CancellationToken::new())
                .await
                .unwrap()
        });
        let client = Channel::connect(addr, None, &CancellationToken::new())
            .await
            .unwrap();
        (client, server.await.unwrap())
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("short", "longer_string"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn generated_secrets_are_hex_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn store_grants_intersection() {
        let store = store_with("agent-1", "s3cret", Permissions::write_only());
        let context = store
            .verify(&Credentials {
                client_id: "agent-1".into(),
                secret: "s3cret".into(),
                permissions: Permissions::read_write(),
            })
            .unwrap();
        // Asked for read+write, ceiling is write-only.
        assert!(!context.permissions.read);
        assert!(context.permissions.write);
    }

    #[test]
    fn store_rejects_wrong_secret_and_unknown_client() {
        let store = store_with("agent-1", "s3cret", Permissions::write_only());
        let mut creds = Credentials {
            client_id: "agent-1".into(),
            secret: "wrong".into(),
            permissions: Permissions::write_only(),
        };
        assert!(store.verify(&creds).is_none());

        creds.client_id = "nobody".into();
        creds.secret = "s3cret".into();
        assert!(store.verify(&creds).is_none());
    }

    #[tokio::test]
    async fn gate_grants_valid_credentials() {
        let (mut client, mut server) = loopback_pair().await;
        let store = store_with("backup-hub", "0011223344556677", Permissions::write_only());

        let server_task = tokio::spawn(async move {
            AuthenticationGate::verify(&mut server, &store).await
        });

        let creds = Credentials {
            client_id: "backup-hub".into(),
            secret: "0011223344556677".into(),
            permissions: Permissions::write_only(),
        };
        let context = AuthenticationGate::authenticate(&mut client, &creds)
            .await
            .unwrap();
        assert!(context.permissions.write);

        let server_context = server_task.await.unwrap().unwrap();
        assert_eq!(server_context.client_id, "backup-hub");
    }

    #[tokio::test]
    async fn gate_rejects_bad_secret_on_both_sides() {
        let (mut client, mut server) = loopback_pair().await;
        let store = store_with("backup-hub", "correct-secret00", Permissions::write_only());

        let server_task = tokio::spawn(async move {
            AuthenticationGate::verify(&mut server, &store).await
        });

        let creds = Credentials {
            client_id: "backup-hub".into(),
            secret: "wrong-secret0000".into(),
            permissions: Permissions::write_only(),
        };
        let client_result = AuthenticationGate::authenticate(&mut client, &creds).await;
        assert!(matches!(
            client_result,
            Err(TransportError::AuthRejected(_))
        ));

        let server_result = server_task.await.unwrap();
        assert!(matches!(
            server_result,
            Err(TransportError::AuthRejected(_))
        ));
    }

    #[tokio::test]
    async fn rejection_classifies_as_fatal() {
        let err = TransportError::AuthRejected("nope".into());
        assert!(err.failure_kind().is_fatal());
    }
}
