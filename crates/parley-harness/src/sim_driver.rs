//! Scripted driver for runtime tests.
//!
//! `SimDriver` implements [`Driver`] so the same [`parley_client::Runtime`]
//! loop that runs over QUIC runs here against a script. The paired
//! [`SimDriverHandle`] decides which connection attempts fail, injects server
//! frames, drops the connection and records what the runtime sent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_client::Driver;
use parley_proto::Frame;
use tokio::sync::mpsc;

/// Error type for the simulation driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

/// State shared between driver and handle.
#[derive(Default)]
struct Script {
    /// Upcoming connection attempts that fail.
    failing_connects: u32,
    /// Every address `connect` was called with.
    attempts: Vec<String>,
    /// Frames the runtime sent.
    sent: Vec<Frame>,
    /// Feeds the current connection; `None` when disconnected.
    inbound: Option<mpsc::UnboundedSender<Frame>>,
}

/// Simulation driver for deterministic runtime tests.
pub struct SimDriver {
    script: Arc<Mutex<Script>>,
    inbound: Option<mpsc::UnboundedReceiver<Frame>>,
}

/// Test side of a [`SimDriver`].
#[derive(Clone)]
pub struct SimDriverHandle {
    script: Arc<Mutex<Script>>,
}

impl SimDriver {
    /// Create a driver and its handle.
    pub fn new() -> (Self, SimDriverHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (Self { script: Arc::clone(&script), inbound: None }, SimDriverHandle { script })
    }
}

impl SimDriverHandle {
    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.script).failing_connects = count;
    }

    /// Number of connection attempts so far.
    pub fn connect_attempts(&self) -> usize {
        lock(&self.script).attempts.len()
    }

    /// Whether a connection is up.
    pub fn is_connected(&self) -> bool {
        lock(&self.script).inbound.is_some()
    }

    /// Deliver a frame from the "server". Returns `false` if disconnected.
    pub fn inject_frame(&self, frame: Frame) -> bool {
        lock(&self.script).inbound.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Simulate the server going away.
    pub fn drop_connection(&self) {
        lock(&self.script).inbound = None;
    }

    /// Take all frames the runtime sent so far.
    pub fn take_sent(&self) -> Vec<Frame> {
        std::mem::take(&mut lock(&self.script).sent)
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn connect(&mut self, addr: &str) -> Result<(), Self::Error> {
        let mut script = lock(&self.script);
        script.attempts.push(addr.to_string());

        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            return Err(SimDriverError(format!("connection to {addr} refused")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        script.inbound = Some(tx);
        self.inbound = Some(rx);
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let mut script = lock(&self.script);
        if script.inbound.is_none() {
            return Err(SimDriverError("not connected".to_string()));
        }
        script.sent.push(frame);
        Ok(())
    }

    async fn recv_frame(&mut self) -> Option<Frame> {
        self.inbound.as_mut()?.recv().await
    }

    fn disconnect(&mut self) {
        self.inbound = None;
        lock(&self.script).inbound = None;
    }
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use parley_proto::Payload;

    use super::*;

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let (mut driver, handle) = SimDriver::new();
        handle.fail_next_connects(2);

        assert!(driver.connect("sim").await.is_err());
        assert!(driver.connect("sim").await.is_err());
        assert!(driver.connect("sim").await.is_ok());

        assert_eq!(handle.connect_attempts(), 3);
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn injected_frames_arrive_until_dropped() {
        let (mut driver, handle) = SimDriver::new();
        driver.connect("sim").await.unwrap();
        let frame = Payload::RequestRoster.framed().unwrap();

        assert!(handle.inject_frame(frame.clone()));
        assert_eq!(driver.recv_frame().await, Some(frame));

        handle.drop_connection();
        assert_eq!(driver.recv_frame().await, None);
        assert!(driver.send_frame(Payload::RequestRoster.framed().unwrap()).await.is_err());
    }
}
