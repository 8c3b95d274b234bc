//! QUIC transport for the client.
//!
//! [`QuicDriver`] implements [`Driver`] over quinn. Frames to the server go
//! out on one bidirectional stream opened per connection; frames from the
//! server arrive on the single unidirectional stream the server opens. This
//! is a thin layer that only moves frames; protocol logic stays in the
//! Sans-IO [`crate::Client`].

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use parley_proto::{ALPN_PROTOCOL, Frame, FrameHeader};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::runtime::Driver;

/// Frames buffered between the reader task and the runtime.
const INCOMING_BUFFER: usize = 64;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No connection is open.
    #[error("not connected")]
    NotConnected,
}

/// QUIC client settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Give up on a handshake after this long
    pub connect_timeout: Duration,
    /// Close the connection after this much silence
    pub idle_timeout: Duration,
    /// TLS server name
    pub server_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            server_name: "localhost".to_string(),
        }
    }
}

/// One live connection.
struct Link {
    connection: quinn::Connection,
    outbound: SendStream,
    inbound: mpsc::Receiver<Frame>,
    reader: tokio::task::AbortHandle,
}

/// [`Driver`] over QUIC.
///
/// Accepts any server certificate: development only, matching the server's
/// self-signed fallback.
pub struct QuicDriver {
    config: TransportConfig,
    endpoint: Option<Endpoint>,
    link: Option<Link>,
}

impl QuicDriver {
    /// Create a disconnected driver.
    pub fn new(config: TransportConfig) -> Self {
        Self { config, endpoint: None, link: None }
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn endpoint(&mut self) -> Result<Endpoint, TransportError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }

        let mut endpoint = Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config(self.config.idle_timeout)?);

        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }
}

impl Default for QuicDriver {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Driver for QuicDriver {
    type Error = TransportError;

    async fn connect(&mut self, addr: &str) -> Result<(), Self::Error> {
        self.disconnect();

        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| TransportError::Connection(format!("invalid address '{addr}': {e}")))?;
        let endpoint = self.endpoint()?;

        let connecting = endpoint
            .connect(addr, &self.config.server_name)
            .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?;
        let connection = tokio::time::timeout(self.config.connect_timeout, connecting)
            .await
            .map_err(|_| TransportError::Connection("handshake timed out".to_string()))?
            .map_err(|e| TransportError::Connection(format!("handshake failed: {e}")))?;

        let (outbound, _) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(format!("open_bi failed: {e}")))?;

        let (tx, inbound) = mpsc::channel(INCOMING_BUFFER);
        let reader = tokio::spawn(read_server_frames(connection.clone(), tx)).abort_handle();

        tracing::debug!("QUIC connection to {} established", addr);
        self.link = Some(Link { connection, outbound, inbound, reader });
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;

        let mut buf = Vec::with_capacity(frame.wire_len());
        frame
            .encode(&mut buf)
            .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;

        link.outbound
            .write_all(&buf)
            .await
            .map_err(|e| TransportError::Stream(format!("write failed: {e}")))
    }

    async fn recv_frame(&mut self) -> Option<Frame> {
        self.link.as_mut()?.inbound.recv().await
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
            link.connection.close(0u32.into(), b"client disconnect");
        }
    }
}

impl Drop for QuicDriver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Accept the server's stream and forward its frames until it ends.
///
/// Dropping `tx` on return is what the runtime sees as connection loss.
async fn read_server_frames(connection: quinn::Connection, tx: mpsc::Sender<Frame>) {
    let recv = match connection.accept_uni().await {
        Ok(recv) => recv,
        Err(e) => {
            tracing::debug!("Server stream never opened: {}", e);
            return;
        },
    };

    if let Err(e) = forward_frames(recv, &tx).await {
        tracing::debug!("Server stream ended: {}", e);
    }
}

async fn forward_frames(mut recv: RecvStream, tx: &mpsc::Sender<Frame>) -> Result<(), TransportError> {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);
        recv.read_exact(&mut buf[..])
            .await
            .map_err(|e| TransportError::Stream(format!("header read failed: {e}")))?;

        let payload_size = FrameHeader::from_bytes(&buf)
            .map_err(|e| TransportError::Protocol(format!("invalid header: {e}")))?
            .payload_size() as usize;

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            recv.read_exact(&mut buf[FrameHeader::SIZE..])
                .await
                .map_err(|e| TransportError::Stream(format!("payload read failed: {e}")))?;
        }

        let frame = Frame::decode(&buf)
            .map_err(|e| TransportError::Protocol(format!("frame decode failed: {e}")))?;

        tx.send(frame).await.map_err(|_| TransportError::Stream("runtime gone".to_string()))?;
    }
}

/// Client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config(idle_timeout: Duration) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Connection(format!("TLS config error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier { provider }))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("QUIC config error: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic));

    let idle = quinn::IdleTimeout::try_from(idle_timeout)
        .map_err(|e| TransportError::Connection(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate but still checks
/// handshake signatures.
#[derive(Debug)]
struct InsecureCertVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
