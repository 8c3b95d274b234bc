//! QUIC listener built on quinn.
//!
//! TLS 1.3 via rustls with ALPN `parley`. Without certificate paths a
//! self-signed certificate for `localhost` is generated, which is only good
//! for development: clients must skip verification to talk to it.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parley_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};

use crate::error::ServerError;

/// TLS material for the listener.
#[derive(Debug, Clone, Default)]
pub struct TlsPaths {
    /// PEM certificate chain
    pub cert_path: Option<String>,
    /// PEM private key
    pub key_path: Option<String>,
}

/// Bound QUIC endpoint accepting client connections.
pub struct QuicListener {
    endpoint: Endpoint,
}

impl QuicListener {
    /// Bind to `address`.
    ///
    /// Uses the certificate and key from `tls` when both are set, otherwise a
    /// generated self-signed certificate. Connections silent for longer than
    /// `idle_timeout` are closed by quinn.
    pub fn bind(
        address: &str,
        tls: &TlsPaths,
        idle_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let tls_config = match (&tls.cert_path, &tls.key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => self_signed_tls_config()?,
        };
        let server_config = quic_server_config(tls_config, idle_timeout)?;

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC listener bound to {}", addr);

        Ok(Self { endpoint })
    }

    /// Wait for the next completed handshake.
    ///
    /// `None` once the endpoint is closed. A failed handshake is an error for
    /// that attempt only.
    pub async fn accept(&self) -> Option<Result<QuicConnection, ServerError>> {
        let incoming = self.endpoint.accept().await?;

        Some(
            incoming
                .await
                .map(|connection| QuicConnection { connection })
                .map_err(|e| ServerError::Transport(format!("handshake failed: {e}"))),
        )
    }

    /// Local address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Stop accepting and close every connection.
    pub fn close(&self, reason: &str) {
        self.endpoint.close(0u32.into(), reason.as_bytes());
    }
}

/// One client connection.
///
/// Clones share the underlying QUIC connection.
#[derive(Clone)]
pub struct QuicConnection {
    connection: quinn::Connection,
}

impl QuicConnection {
    /// Wait for the client to open a bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Open the server → client stream.
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close with application error code 0.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))
}

fn self_signed_tls_config() -> Result<rustls::ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    tracing::warn!("Using self-signed certificate - not for production use!");

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))
}

fn quic_server_config(
    mut tls_config: rustls::ServerConfig,
    idle_timeout: Duration,
) -> Result<ServerConfig, ServerError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;
    let mut server_config = ServerConfig::with_crypto(Arc::new(crypto));

    let idle = quinn::IdleTimeout::try_from(idle_timeout)
        .map_err(|e| ServerError::Config(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}
