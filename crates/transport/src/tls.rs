//! TLS configuration for the transport channel.
//!
//! Strict certificate validation against a caller-provided root bundle is
//! the default; `CertPolicy::TrustAny` is the explicit opt-out for
//! self-signed and test deployments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::TransportError;

/// How the client judges the server certificate.
#[derive(Debug, Clone)]
pub enum CertPolicy {
    /// Validate against the PEM CA bundle at this path. The default posture.
    TrustedRoots(PathBuf),
    /// Skip certificate validation entirely. Explicit opt-out for
    /// self-signed certificates; the connection is still encrypted.
    TrustAny,
}

/// Client-side TLS settings.
#[derive(Debug, Clone)]
pub struct TlsClientSettings {
    /// Name presented for SNI and certificate matching.
    pub server_name: String,
    pub policy: CertPolicy,
}

/// Server-side TLS settings: certificate chain and key, PEM.
#[derive(Debug, Clone)]
pub struct TlsServerSettings {
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
}

impl TlsClientSettings {
    /// Builds the connector for these settings.
    pub fn connector(&self) -> Result<TlsConnector, TransportError> {
        let config = match &self.policy {
            CertPolicy::TrustedRoots(bundle) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(bundle)? {
                    roots
                        .add(cert)
                        .map_err(|e| TransportError::Tls(format!("bad root certificate: {e}")))?;
                }
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
            CertPolicy::TrustAny => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustAnyVerifier::new()))
                .with_no_client_auth(),
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }

    /// The rustls server name for the handshake.
    pub fn dns_name(&self) -> Result<ServerName<'static>, TransportError> {
        ServerName::try_from(self.server_name.clone())
            .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))
    }
}

impl TlsServerSettings {
    /// Builds the acceptor for these settings.
    pub fn acceptor(&self) -> Result<TlsAcceptor, TransportError> {
        let certs = load_certs(&self.cert_chain)?;
        let key = load_key(&self.private_key)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::Tls(format!("bad certificate/key pair: {e}")))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Generates a self-signed certificate and key as PEM strings.
///
/// Pairs with `CertPolicy::TrustAny` on the client for test and
/// closed-network deployments.
pub fn generate_self_signed(hostnames: &[String]) -> Result<(String, String), TransportError> {
    let certified = rcgen::generate_simple_self_signed(hostnames.to_vec())
        .map_err(|e| TransportError::Tls(format!("certificate generation failed: {e}")))?;
    Ok((
        certified.cert.pem(),
        certified.key_pair.serialize_pem(),
    ))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = std::fs::read(path)?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| TransportError::Tls(format!("unreadable certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| TransportError::Tls(format!("unreadable key PEM: {e}")))?
        .ok_or_else(|| TransportError::Tls(format!("no private key in {}", path.display())))
}

/// Accepts any server certificate. Only reachable through the explicit
/// `CertPolicy::TrustAny` opt-out.
#[derive(Debug)]
struct TrustAnyVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl TrustAnyVerifier {
    fn new() -> Self {
        Self {
            schemes: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for TrustAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}
