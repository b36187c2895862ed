//! Framed channel over plain or TLS-wrapped TCP.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use backhaul_protocol::{Frame, FrameType, read_frame, write_frame};

use crate::tls::TlsClientSettings;
use crate::{BUFFER_SIZE, CONNECT_TIMEOUT, TransportError};

/// Object-safe alias for the underlying byte stream.
trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// A connected, framed transport channel.
///
/// Reads and writes whole frames; the caller owns ordering and state.
/// TLS, when configured, is negotiated during construction, so every
/// frame ever sent on a TLS channel is encrypted.
pub struct Channel {
    stream: BufStream<Box<dyn Io>>,
    peer: String,
}

impl Channel {
    /// Connects to `addr`, optionally negotiating TLS, under the connect
    /// deadline and the caller's cancellation token.
    pub async fn connect(
        addr: SocketAddr,
        tls: Option<&TlsClientSettings>,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let tcp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(TransportError::Timeout),
                }
            }
        };

        let stream: Box<dyn Io> = match tls {
            None => {
                info!(%addr, "channel connected");
                Box::new(tcp)
            }
            Some(settings) => {
                let connector = settings.connector()?;
                let name = settings.dns_name()?;
                let tls_stream = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    result = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(name, tcp)) => {
                        match result {
                            Ok(Ok(s)) => s,
                            Ok(Err(e)) => {
                                return Err(TransportError::Tls(format!("handshake failed: {e}")));
                            }
                            Err(_) => return Err(TransportError::Timeout),
                        }
                    }
                };
                info!(%addr, "channel connected (TLS)");
                Box::new(tls_stream)
            }
        };

        Ok(Self {
            stream: BufStream::with_capacity(BUFFER_SIZE, BUFFER_SIZE, stream),
            peer: addr.to_string(),
        })
    }

    /// Wraps an accepted TCP stream, optionally completing a TLS accept.
    pub async fn accept(
        tcp: TcpStream,
        acceptor: Option<&TlsAcceptor>,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let peer = tcp
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());

        let stream: Box<dyn Io> = match acceptor {
            None => Box::new(tcp),
            Some(acceptor) => {
                let tls_stream = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    result = tokio::time::timeout(CONNECT_TIMEOUT, acceptor.accept(tcp)) => {
                        match result {
                            Ok(Ok(s)) => s,
                            Ok(Err(e)) => {
                                return Err(TransportError::Tls(format!("accept handshake failed: {e}")));
                            }
                            Err(_) => return Err(TransportError::Timeout),
                        }
                    }
                };
                Box::new(tls_stream)
            }
        };

        debug!(%peer, "channel accepted");
        Ok(Self {
            stream: BufStream::with_capacity(BUFFER_SIZE, BUFFER_SIZE, stream),
            peer,
        })
    }

    /// Sends one frame and flushes.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        write_frame(&mut self.stream, frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Encodes and sends a control message.
    pub async fn send_control<T: Serialize>(
        &mut self,
        frame_type: FrameType,
        payload: &T,
    ) -> Result<(), TransportError> {
        let frame = Frame::control(frame_type, payload)?;
        self.send(&frame).await
    }

    /// Sends a chunk header followed by its raw payload in one flush.
    pub async fn send_chunk<T: Serialize>(
        &mut self,
        header: &T,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let header_frame = Frame::control(FrameType::ChunkHeader, header)?;
        write_frame(&mut self.stream, &header_frame).await?;
        write_frame(&mut self.stream, &Frame::chunk_payload(payload)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receives the next frame.
    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        Ok(read_frame(&mut self.stream).await?)
    }

    /// Flushes and shuts down the write side.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Peer address, for logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}
