//! Parley presence and relay server.
//!
//! # Architecture
//!
//! [`ServerDriver`] is Sans-IO: events in, actions out, no sockets or clocks
//! of its own. [`Server`] is the production glue that feeds it QUIC events and
//! executes its actions with tokio.
//!
//! Each client connection gets one server → client unidirectional stream,
//! opened on accept and owned by a writer task that drains a bounded queue.
//! Frames are queued while the driver lock is held, so they reach a client in
//! the order the driver produced them, but no network write ever happens under
//! that lock: a client that stops reading only fills its own queue, after which
//! frames for it are dropped. Client → server frames arrive on bidirectional
//! streams the client opens.
//!
//! # Components
//!
//! - [`ServerDriver`]: action-based presence and relay logic
//! - [`PresenceRegistry`]: connection ↔ display name directory
//! - [`Server`]: QUIC runtime
//! - [`SystemEnv`]: production environment (system clock, OS RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod error;
mod registry;
mod server_error;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
pub use driver::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
pub use error::ServerError;
use parley_core::{ConnectionId, Environment};
use parley_proto::{Frame, FrameHeader};
pub use registry::{PresenceRegistry, Registration};
pub use server_error::DriverError;
pub use system_env::SystemEnv;
use tokio::sync::{
    Mutex, RwLock,
    mpsc::{self, error::TrySendError},
};
pub use transport::{QuicConnection, QuicListener, TlsPaths};

/// Frames buffered per connection before new frames to it are dropped.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Driver shared by every connection task.
type SharedDriver = Arc<Mutex<ServerDriver<SystemEnv>>>;

/// Per-connection I/O handles.
struct SharedState {
    /// Session → connection (for closing)
    connections: RwLock<HashMap<ConnectionId, QuicConnection>>,
    /// Session → queue drained by that client's writer task
    outbound: RwLock<HashMap<ConnectionId, mpsc::Sender<Bytes>>>,
}

/// Configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// TLS certificate and key (self-signed when absent)
    pub tls: TlsPaths,
    /// Close connections idle for this long
    pub idle_timeout: Duration,
    /// Driver configuration (limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            tls: TlsPaths::default(),
            idle_timeout: Duration::from_secs(30),
            driver: DriverConfig::default(),
        }
    }
}

/// Production Parley server.
pub struct Server {
    driver: ServerDriver<SystemEnv>,
    listener: QuicListener,
    env: SystemEnv,
}

impl Server {
    /// Bind the listener. Must be called inside a tokio runtime.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), config.driver);
        let listener = QuicListener::bind(&config.bind_address, &config.tls, config.idle_timeout)?;

        Ok(Self { driver, listener, env })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.listener.local_addr()
    }

    /// Accept connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close the endpoint.
    pub async fn run_until(
        self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.listener.local_addr()?);

        let env = self.env;
        let listener = self.listener;
        let driver = Arc::new(Mutex::new(self.driver));
        let shared = Arc::new(SharedState {
            connections: RwLock::new(HashMap::new()),
            outbound: RwLock::new(HashMap::new()),
        });

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Server shutting down");
                    listener.close("server shutdown");
                    return Ok(());
                },
                accepted = listener.accept() => match accepted {
                    None => return Ok(()),
                    Some(Ok(conn)) => {
                        let driver = Arc::clone(&driver);
                        let shared = Arc::clone(&shared);
                        let env = env.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, driver, shared, env).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    },
                    Some(Err(e)) => tracing::warn!("Accept error: {}", e),
                },
            }
        }
    }
}

/// Draw a connection ID not held by any live connection and claim it.
async fn claim_session_id(
    shared: &SharedState,
    env: &SystemEnv,
    conn: &QuicConnection,
) -> ConnectionId {
    let mut connections = shared.connections.write().await;
    loop {
        let candidate = env.random_u64();
        if !connections.contains_key(&candidate) {
            connections.insert(candidate, conn.clone());
            return candidate;
        }
    }
}

/// Drive one QUIC connection from accept to close.
async fn handle_connection(
    conn: QuicConnection,
    driver: SharedDriver,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let session_id = claim_session_id(&shared, &env, &conn).await;
    tracing::debug!("New connection {} from {}", session_id, conn.remote_addr());

    match conn.open_uni().await {
        Ok(stream) => {
            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
            shared.outbound.write().await.insert(session_id, tx);
            tokio::spawn(write_frames(session_id, stream, rx));
        },
        Err(e) => {
            shared.connections.write().await.remove(&session_id);
            return Err(e);
        },
    }

    dispatch(&driver, &shared, ServerEvent::ConnectionAccepted { session_id }).await?;

    let reason = loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let driver = Arc::clone(&driver);
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(session_id, send, recv, &driver, &shared).await {
                        tracing::debug!("Stream error on {}: {}", session_id, e);
                    }
                });
            },
            Err(e) => break e.to_string(),
        }
    };

    tracing::debug!("Connection {} closed: {}", session_id, reason);

    shared.connections.write().await.remove(&session_id);
    // Dropping the sender ends the writer task.
    shared.outbound.write().await.remove(&session_id);

    dispatch(&driver, &shared, ServerEvent::ConnectionClosed { session_id, reason }).await
}

/// Read frames from one client stream until it ends.
///
/// A frame that cannot be decoded is answered with an error frame and ends
/// this stream, since the byte stream can no longer be framed.
async fn handle_stream(
    session_id: ConnectionId,
    send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: &SharedDriver,
    shared: &SharedState,
) -> Result<(), ServerError> {
    // Replies go out on the per-connection uni stream.
    drop(send);

    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        if let Err(e) = recv.read_exact(&mut buf[..]).await {
            tracing::debug!("Stream from {} ended: {}", session_id, e);
            return Ok(());
        }

        let payload_size = match FrameHeader::from_bytes(&buf) {
            Ok(header) => header.payload_size() as usize,
            Err(e) => {
                let reason = format!("invalid frame header: {e}");
                return dispatch(driver, shared, ServerEvent::MalformedFrame { session_id, reason })
                    .await;
            },
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            recv.read_exact(&mut buf[FrameHeader::SIZE..])
                .await
                .map_err(|e| ServerError::Transport(format!("payload read failed: {e}")))?;
        }

        let frame = match Frame::decode(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                let reason = format!("frame decode failed: {e}");
                return dispatch(driver, shared, ServerEvent::MalformedFrame { session_id, reason })
                    .await;
            },
        };

        if let Err(e) = dispatch(driver, shared, ServerEvent::FrameReceived { session_id, frame }).await
        {
            tracing::warn!("Frame processing error on {}: {}", session_id, e);
        }
    }
}

/// Feed one event to the driver and queue its actions.
///
/// The driver lock is held until the frames are queued so that frames from
/// consecutive events reach each client in order. Queueing never waits on
/// the network.
async fn dispatch(
    driver: &SharedDriver,
    shared: &SharedState,
    event: ServerEvent,
) -> Result<(), ServerError> {
    let mut driver = driver.lock().await;
    let actions = driver.process_event(event)?;
    execute_actions(actions, shared).await;
    Ok(())
}

/// Execute driver actions against live connections.
async fn execute_actions(actions: Vec<ServerAction>, shared: &SharedState) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                if let Some(bytes) = encode(&frame) {
                    enqueue(shared, session_id, bytes).await;
                }
            },

            ServerAction::Broadcast { sessions, frame } => {
                let Some(bytes) = encode(&frame) else { continue };
                for session_id in sessions {
                    enqueue(shared, session_id, bytes.clone()).await;
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!("Closing connection {}: {}", session_id, reason);
                if let Some(conn) = shared.connections.write().await.remove(&session_id) {
                    conn.close(&reason);
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

fn encode(frame: &Frame) -> Option<Bytes> {
    let mut buf = BytesMut::with_capacity(frame.wire_len());
    match frame.encode(&mut buf) {
        Ok(()) => Some(buf.freeze()),
        Err(e) => {
            tracing::error!("Dropping unencodable frame: {}", e);
            None
        },
    }
}

/// Queue a frame for one session. Never waits: a full queue drops the frame.
async fn enqueue(shared: &SharedState, session_id: ConnectionId, bytes: Bytes) {
    let queues = shared.outbound.read().await;
    let Some(queue) = queues.get(&session_id) else {
        tracing::debug!("No outbound queue for {}, dropping frame", session_id);
        return;
    };

    match queue.try_send(bytes) {
        Ok(()) => {},
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Outbound queue for {} full, dropping frame", session_id);
        },
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("Writer for {} gone, dropping frame", session_id);
        },
    }
}

/// Drain one connection's queue onto its stream.
///
/// Only this task waits on a slow reader.
async fn write_frames(
    session_id: ConnectionId,
    mut stream: quinn::SendStream,
    mut queue: mpsc::Receiver<Bytes>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = stream.write_all(&bytes).await {
            tracing::warn!("Write to {} failed: {}", session_id, e);
            return;
        }
    }

    if let Err(e) = stream.finish() {
        tracing::debug!("Finishing stream to {} failed: {}", session_id, e);
    }
}
