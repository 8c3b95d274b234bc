//! Generic runtime for client orchestration.
//!
//! The Runtime drives the session event loop, coordinating between:
//! - [`Client`]: the Sans-IO reconciler
//! - [`Driver`]: platform-specific transport
//! - [`RuntimeHandle`]: commands in, updates out
//!
//! Connection attempts follow a [`ReconnectPolicy`]. The reconciler itself
//! knows nothing about retry timing; it only sees connect and disconnect
//! signals.

use std::{future::Future, time::Duration};

use parley_core::{ConnectionId, Environment};
use parley_proto::Frame;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    client::Client,
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Commands buffered between the handle and the runtime.
const COMMAND_BUFFER: usize = 64;

/// Abstracts transport I/O for the runtime.
///
/// Implementations provide platform-specific I/O while the generic
/// [`Runtime`] handles orchestration, so the same loop runs over QUIC in
/// production and over scripted channels in simulation.
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Establish a connection to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn connect(&mut self, addr: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    fn send_frame(&mut self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive the next frame from the server.
    ///
    /// Returns `None` once the connection is lost. Must be cancel-safe: the
    /// runtime races it against incoming commands.
    fn recv_frame(&mut self) -> impl Future<Output = Option<Frame>> + Send;

    /// Tear down the current connection, if any.
    fn disconnect(&mut self);
}

/// Bounded retry with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts before giving up. Each loss starts a fresh budget.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, delay: Duration::from_secs(1) }
    }
}

/// Runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Every connection attempt in the budget failed.
    #[error("gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// The reconciler rejected a command or event.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The runtime is no longer running.
    #[error("runtime stopped")]
    Closed,
}

/// Requests from the application to the runtime.
#[derive(Debug)]
pub enum Command {
    /// Send a direct message.
    Send {
        /// Recipient connection.
        peer: ConnectionId,
        /// Message text.
        text: String,
        /// Outcome of the local send.
        reply: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Select a peer.
    Select {
        /// Peer to select.
        peer: ConnectionId,
        /// Outcome of the selection.
        reply: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Clear the selection.
    ClearSelection,

    /// Stop the runtime, cancelling any reconnection in progress.
    Shutdown,
}

/// Application side of a [`Runtime`].
///
/// Dropping the handle stops the runtime like [`RuntimeHandle::shutdown`].
#[derive(Debug)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    updates: mpsc::UnboundedReceiver<ClientAction>,
}

impl RuntimeHandle {
    /// Send `text` to `peer`.
    pub async fn send(
        &self,
        peer: ConnectionId,
        text: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        let (reply, outcome) = oneshot::channel();
        self.command(Command::Send { peer, text: text.into(), reply }).await?;
        outcome.await.map_err(|_| RuntimeError::Closed)?.map_err(RuntimeError::from)
    }

    /// Select `peer`.
    pub async fn select(&self, peer: ConnectionId) -> Result<(), RuntimeError> {
        let (reply, outcome) = oneshot::channel();
        self.command(Command::Select { peer, reply }).await?;
        outcome.await.map_err(|_| RuntimeError::Closed)?.map_err(RuntimeError::from)
    }

    /// Clear the selection.
    pub async fn clear_selection(&self) -> Result<(), RuntimeError> {
        self.command(Command::ClearSelection).await
    }

    /// Stop the runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.command(Command::Shutdown).await
    }

    /// Next state change from the reconciler. `None` once the runtime stops.
    pub async fn next_update(&mut self) -> Option<ClientAction> {
        self.updates.recv().await
    }

    /// Update already queued, without waiting.
    pub fn try_next_update(&mut self) -> Option<ClientAction> {
        self.updates.try_recv().ok()
    }

    async fn command(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).await.map_err(|_| RuntimeError::Closed)
    }
}

/// Whether the loop keeps going.
enum Flow {
    Continue,
    Shutdown,
}

/// What woke a select.
enum Wake<T> {
    Ready(T),
    Command(Option<Command>),
}

/// Generic runtime that orchestrates a [`Client`] over a [`Driver`].
///
/// # Type Parameters
///
/// - `D`: Platform-specific transport driver
/// - `E`: Environment for time and retry delays
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    reconciler: Reconciler<E>,
    env: E,
    server_addr: String,
    policy: ReconnectPolicy,
    commands: mpsc::Receiver<Command>,
}

/// Client plus the channel its updates go to.
///
/// Kept apart from the driver so commands can be applied while a connect or
/// receive future still borrows the driver.
struct Reconciler<E: Environment> {
    client: Client<E>,
    updates: mpsc::UnboundedSender<ClientAction>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime that will connect to `server_addr` as `name`.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidName` if `name` fails validation.
    pub fn new(
        driver: D,
        env: E,
        name: &str,
        server_addr: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Result<(Self, RuntimeHandle), ClientError> {
        let client = Client::new(env.clone(), name)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            driver,
            reconciler: Reconciler { client, updates: update_tx },
            env,
            server_addr: server_addr.into(),
            policy,
            commands: command_rx,
        };

        Ok((runtime, RuntimeHandle { commands: command_tx, updates: update_rx }))
    }

    /// The reconciler this runtime drives.
    pub fn client(&self) -> &Client<E> {
        &self.reconciler.client
    }

    /// Run until shutdown or until a reconnection budget is exhausted.
    ///
    /// # Errors
    ///
    /// `RuntimeError::RetriesExhausted` when every attempt of one connection
    /// cycle fails.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let result = self.run_loop().await;
        self.driver.disconnect();
        tracing::debug!("Runtime for {} stopped", self.reconciler.client.name());
        result
    }

    async fn run_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            if let Flow::Shutdown = self.connect_with_retry().await? {
                return Ok(());
            }
            if let Flow::Shutdown = self.session().await? {
                return Ok(());
            }
        }
    }

    /// Connect within the retry budget, then announce.
    async fn connect_with_retry(&mut self) -> Result<Flow, RuntimeError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.reconciler.apply(ClientEvent::TransportConnecting)?;

            let outcome = {
                let connect = self.driver.connect(&self.server_addr);
                tokio::pin!(connect);
                loop {
                    let wake = tokio::select! {
                        result = &mut connect => Wake::Ready(result),
                        command = self.commands.recv() => Wake::Command(command),
                    };
                    match wake {
                        Wake::Ready(result) => break result,
                        Wake::Command(command) => match self.reconciler.apply_command(command) {
                            None => return Ok(Flow::Shutdown),
                            Some(frames) => drop_offline(frames),
                        },
                    }
                }
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("Connected to {} on attempt {}", self.server_addr, attempt);
                    let frames = self.reconciler.apply(ClientEvent::TransportConnected)?;
                    if self.send_all(frames).await {
                        return Ok(Flow::Continue);
                    }
                    last_error = "announce failed".to_string();
                },
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        max_attempts,
                        self.server_addr,
                        e
                    );
                    last_error = e.to_string();
                    let reason = last_error.clone();
                    self.reconciler.apply(ClientEvent::TransportDisconnected { reason })?;
                },
            }

            if attempt < max_attempts && let Flow::Shutdown = self.pause().await {
                return Ok(Flow::Shutdown);
            }
        }

        Err(RuntimeError::RetriesExhausted { attempts: max_attempts, last_error })
    }

    /// Wait out the retry delay while still serving commands.
    async fn pause(&mut self) -> Flow {
        let sleep = self.env.sleep(self.policy.delay);
        tokio::pin!(sleep);

        loop {
            let wake = tokio::select! {
                () = &mut sleep => Wake::Ready(()),
                command = self.commands.recv() => Wake::Command(command),
            };
            match wake {
                Wake::Ready(()) => return Flow::Continue,
                Wake::Command(command) => match self.reconciler.apply_command(command) {
                    None => return Flow::Shutdown,
                    Some(frames) => drop_offline(frames),
                },
            }
        }
    }

    /// Pump frames and commands until the connection drops or shutdown.
    async fn session(&mut self) -> Result<Flow, RuntimeError> {
        loop {
            let wake = tokio::select! {
                frame = self.driver.recv_frame() => Wake::Ready(frame),
                command = self.commands.recv() => Wake::Command(command),
            };

            let frames = match wake {
                Wake::Ready(Some(frame)) => {
                    match self.reconciler.apply(ClientEvent::FrameReceived(frame)) {
                        Ok(frames) => frames,
                        Err(e) => {
                            tracing::warn!("Dropping frame from server: {}", e);
                            continue;
                        },
                    }
                },
                Wake::Ready(None) => {
                    self.connection_lost("connection closed by server")?;
                    return Ok(Flow::Continue);
                },
                Wake::Command(command) => match self.reconciler.apply_command(command) {
                    None => return Ok(Flow::Shutdown),
                    Some(frames) => frames,
                },
            };

            if !self.send_all(frames).await {
                self.connection_lost("send failed")?;
                return Ok(Flow::Continue);
            }
        }
    }

    fn connection_lost(&mut self, reason: &str) -> Result<(), RuntimeError> {
        tracing::warn!("Lost connection to {}: {}", self.server_addr, reason);
        self.driver.disconnect();
        self.reconciler.apply(ClientEvent::TransportDisconnected { reason: reason.to_string() })?;
        Ok(())
    }

    /// Returns `false` if the driver failed.
    async fn send_all(&mut self, frames: Vec<Frame>) -> bool {
        for frame in frames {
            if let Err(e) = self.driver.send_frame(frame).await {
                tracing::warn!("Send to {} failed: {}", self.server_addr, e);
                return false;
            }
        }
        true
    }
}

impl<E: Environment> Reconciler<E> {
    /// Feed an event to the client and route its actions. Returns frames to
    /// send.
    fn apply(&mut self, event: ClientEvent) -> Result<Vec<Frame>, ClientError> {
        let actions = self.client.handle(event)?;
        Ok(route(actions, &self.updates))
    }

    /// Apply a command. `None` means shut down.
    fn apply_command(&mut self, command: Option<Command>) -> Option<Vec<Frame>> {
        let Some(command) = command else {
            tracing::debug!("Command channel closed");
            return None;
        };

        match command {
            Command::Send { peer, text, reply } => {
                Some(self.apply_with_reply(ClientEvent::SendMessage { peer, text }, reply))
            },
            Command::Select { peer, reply } => {
                Some(self.apply_with_reply(ClientEvent::SelectPeer(peer), reply))
            },
            Command::ClearSelection => match self.apply(ClientEvent::ClearSelection) {
                Ok(frames) => Some(frames),
                Err(e) => {
                    tracing::warn!("Clear selection failed: {}", e);
                    Some(Vec::new())
                },
            },
            Command::Shutdown => None,
        }
    }

    fn apply_with_reply(
        &mut self,
        event: ClientEvent,
        reply: oneshot::Sender<Result<(), ClientError>>,
    ) -> Vec<Frame> {
        let (frames, outcome) = match self.apply(event) {
            Ok(frames) => (frames, Ok(())),
            Err(e) => (Vec::new(), Err(e)),
        };
        // Caller may have stopped waiting.
        let _ = reply.send(outcome);
        frames
    }
}

/// Split actions into frames to send and updates for the application.
fn route(actions: Vec<ClientAction>, updates: &mpsc::UnboundedSender<ClientAction>) -> Vec<Frame> {
    let mut frames = Vec::new();

    for action in actions {
        match action {
            ClientAction::Send(frame) => frames.push(frame),
            ClientAction::Log { message } => tracing::debug!("{}", message),
            other => {
                // No receiver means nobody is watching; keep running.
                let _ = updates.send(other);
            },
        }
    }

    frames
}

fn drop_offline(frames: Vec<Frame>) {
    if !frames.is_empty() {
        tracing::debug!("Dropping {} frame(s) while offline", frames.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn route_splits_frames_from_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = parley_proto::Payload::RequestRoster.framed().unwrap();

        let frames = route(
            vec![
                ClientAction::Send(frame.clone()),
                ClientAction::Log { message: "noise".into() },
                ClientAction::SelectionChanged { selected: None },
            ],
            &tx,
        );

        assert_eq!(frames, vec![frame]);
        assert_eq!(rx.try_recv().ok(), Some(ClientAction::SelectionChanged { selected: None }));
        assert!(rx.try_recv().is_err());
    }
}
