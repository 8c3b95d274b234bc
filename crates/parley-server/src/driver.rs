//! Server driver.
//!
//! Sans-IO core of the server: consumes [`ServerEvent`]s, mutates the
//! [`PresenceRegistry`] and returns [`ServerAction`]s for the runtime to
//! execute. Every event is handled to completion before the next, and every
//! outbound frame (including the recipient list of a broadcast) is computed
//! here, so a roster always reflects a registry state that existed.

use std::collections::HashMap;

use parley_core::{
    ConnectionId, DEFAULT_MAX_NAME_LEN, Environment, SELF_MARKER,
    identity::{normalize_name, normalize_text},
};
use parley_proto::{
    Frame, FrameHeader, Payload,
    payloads::{
        ErrorPayload,
        chat::{RelayedMessage, SendMessage},
        presence::Roster,
    },
};

use crate::{registry::PresenceRegistry, server_error::DriverError};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Maximum concurrent connections. Extra connections are closed on accept.
    pub max_connections: usize,
    /// Maximum display name length in bytes (after trimming).
    pub max_name_len: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, max_name_len: DEFAULT_MAX_NAME_LEN }
    }
}

/// Events that the server driver processes.
///
/// Produced by the runtime (QUIC in production, in-memory in simulation).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: ConnectionId,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Connection that sent the frame
        session_id: ConnectionId,
        /// The received frame
        frame: Frame,
    },

    /// Bytes from a connection could not be framed
    MalformedFrame {
        /// Connection that sent the bytes
        session_id: ConnectionId,
        /// Decode failure
        reason: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: ConnectionId,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the server driver produces.
///
/// Delivery is fire-and-forget: the runtime logs and skips sessions whose
/// stream is gone.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send a frame to one session
    SendToSession {
        /// Target session ID
        session_id: ConnectionId,
        /// Frame to send
        frame: Frame,
    },

    /// Send the same frame to every listed session
    Broadcast {
        /// Recipients, fixed at the moment the frame was built
        sessions: Vec<ConnectionId>,
        /// Frame to send
        frame: Frame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: ConnectionId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

impl ServerAction {
    fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log { level, message: message.into() }
    }
}

/// Action-based presence and relay server.
///
/// Holds no conversation state: messages pass through and are forgotten.
pub struct ServerDriver<E: Environment> {
    /// Accepted connections and when they were accepted
    connections: HashMap<ConnectionId, E::Instant>,
    /// Connection ↔ identity directory
    registry: PresenceRegistry,
    /// Environment (time)
    env: E,
    /// Server configuration
    config: DriverConfig,
}

impl<E: Environment> ServerDriver<E> {
    /// Create a new server driver.
    pub fn new(env: E, config: DriverConfig) -> Self {
        Self { connections: HashMap::new(), registry: PresenceRegistry::new(), env, config }
    }

    /// Process a server event and return actions to execute.
    ///
    /// # Errors
    ///
    /// - `DriverError::SessionNotFound` for a frame from an unknown session
    /// - `DriverError::Protocol` if an outbound frame fails to encode
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                Ok(self.handle_connection_accepted(session_id))
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, &frame)
            },
            ServerEvent::MalformedFrame { session_id, reason } => {
                if !self.connections.contains_key(&session_id) {
                    return Err(DriverError::SessionNotFound(session_id));
                }
                self.reject(session_id, ErrorPayload::invalid_payload(reason))
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, &reason)
            },
        }
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Number of accepted, still-open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether `session_id` is an accepted, still-open connection.
    pub fn is_connected(&self, session_id: ConnectionId) -> bool {
        self.connections.contains_key(&session_id)
    }

    /// Open sessions, ascending.
    pub fn sessions(&self) -> Vec<ConnectionId> {
        let mut sessions: Vec<_> = self.connections.keys().copied().collect();
        sessions.sort_unstable();
        sessions
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn handle_connection_accepted(&mut self, session_id: ConnectionId) -> Vec<ServerAction> {
        if self.connections.contains_key(&session_id) {
            return vec![ServerAction::log(
                LogLevel::Warn,
                format!("duplicate accept for session {session_id} ignored"),
            )];
        }

        if self.connections.len() >= self.config.max_connections {
            return vec![
                ServerAction::CloseConnection {
                    session_id,
                    reason: "max connections exceeded".to_string(),
                },
                ServerAction::log(
                    LogLevel::Warn,
                    format!(
                        "refusing session {session_id}: {} connections open",
                        self.connections.len()
                    ),
                ),
            ];
        }

        self.connections.insert(session_id, self.env.now());

        vec![ServerAction::log(LogLevel::Debug, format!("session {session_id} accepted"))]
    }

    fn handle_frame_received(
        &mut self,
        session_id: ConnectionId,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, DriverError> {
        if !self.connections.contains_key(&session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        let raw_opcode = frame.header.opcode();
        if !frame.header.opcode_enum().is_some_and(|op| op.is_client_request()) {
            return self.reject(session_id, ErrorPayload::unexpected_opcode(raw_opcode));
        }

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => return self.reject(session_id, ErrorPayload::invalid_payload(e.to_string())),
        };

        match payload {
            Payload::AnnounceIdentity(announce) => self.handle_announce(session_id, &announce.name),
            Payload::RequestRoster => self.handle_request_roster(session_id),
            Payload::SendMessage(message) => self.handle_send_message(session_id, message),
            Payload::Roster(_) | Payload::Message(_) | Payload::Error(_) => {
                self.reject(session_id, ErrorPayload::unexpected_opcode(raw_opcode))
            },
        }
    }

    fn handle_announce(
        &mut self,
        session_id: ConnectionId,
        raw_name: &str,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let name = match normalize_name(raw_name, self.config.max_name_len) {
            Ok(name) => name,
            Err(e) => {
                return self
                    .reject(session_id, ErrorPayload::invalid_name(format!("Invalid username: {e}")));
            },
        };

        let outcome = self.registry.register(session_id, &name);
        let mut actions = Vec::new();

        if let Some(evicted) = outcome.evicted {
            actions.push(ServerAction::log(
                LogLevel::Info,
                format!("session {evicted} lost name {name:?} to session {session_id}"),
            ));
        }

        let message = match outcome.previous_name.as_deref() {
            _ if outcome.is_noop(&name) => format!("session {session_id} re-announced {name:?}"),
            Some(previous) => format!("session {session_id} renamed {previous:?} -> {name:?}"),
            None => format!("session {session_id} announced as {name:?}"),
        };
        actions.push(ServerAction::log(LogLevel::Info, message));

        actions.push(self.roster_broadcast()?);
        Ok(actions)
    }

    fn handle_request_roster(
        &self,
        session_id: ConnectionId,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let frame = self.roster_frame()?;
        Ok(vec![ServerAction::SendToSession { session_id, frame }])
    }

    fn handle_send_message(
        &self,
        session_id: ConnectionId,
        message: SendMessage,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let SendMessage { recipient, text } = message;

        let Some(author) = self.registry.name_of(session_id) else {
            return Ok(vec![ServerAction::log(
                LogLevel::Debug,
                format!("dropping message from unannounced session {session_id}"),
            )]);
        };

        let Some(text) = normalize_text(&text) else {
            return Ok(vec![ServerAction::log(
                LogLevel::Debug,
                format!("dropping empty message from session {session_id}"),
            )]);
        };

        if self.registry.name_of(recipient).is_none() {
            return Ok(vec![ServerAction::log(
                LogLevel::Debug,
                format!("dropping message from session {session_id}: recipient {recipient} not registered"),
            )]);
        }

        let relayed =
            Payload::Message(RelayedMessage { author: author.to_string(), text: text.to_string() })
                .framed()?;
        let echo =
            Payload::Message(RelayedMessage { author: SELF_MARKER.to_string(), text: text.to_string() })
                .framed()?;

        // The author name replaces the recipient ID, so a request that fit
        // can produce a relay that does not.
        let limit = FrameHeader::MAX_PAYLOAD_SIZE as usize;
        if relayed.payload.len() > limit || echo.payload.len() > limit {
            return self.reject(
                session_id,
                ErrorPayload::invalid_payload(format!(
                    "message too large to relay: {} bytes",
                    relayed.payload.len().max(echo.payload.len())
                )),
            );
        }

        Ok(vec![
            ServerAction::SendToSession { session_id: recipient, frame: relayed },
            ServerAction::SendToSession { session_id, frame: echo },
            ServerAction::log(
                LogLevel::Debug,
                format!("relayed message from session {session_id} to {recipient}"),
            ),
        ])
    }

    fn handle_connection_closed(
        &mut self,
        session_id: ConnectionId,
        reason: &str,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let Some(accepted_at) = self.connections.remove(&session_id) else {
            return Ok(vec![ServerAction::log(
                LogLevel::Debug,
                format!("close for unknown session {session_id} ({reason})"),
            )]);
        };

        let lifetime = self.env.now() - accepted_at;
        let name = self.registry.unregister(session_id);

        let who = name.map_or_else(|| "unannounced".to_string(), |n| format!("{n:?}"));
        Ok(vec![
            ServerAction::log(
                LogLevel::Info,
                format!("session {session_id} ({who}) closed after {lifetime:?}: {reason}"),
            ),
            self.roster_broadcast()?,
        ])
    }

    /// Answer invalid input with an error frame to the offending session only.
    fn reject(
        &self,
        session_id: ConnectionId,
        error: ErrorPayload,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let message = format!("rejecting input from session {session_id}: {}", error.message);
        let frame = Payload::Error(error).framed()?;

        Ok(vec![
            ServerAction::SendToSession { session_id, frame },
            ServerAction::log(LogLevel::Warn, message),
        ])
    }

    fn roster_frame(&self) -> Result<Frame, DriverError> {
        let roster = Roster { entries: self.registry.snapshot() };
        Ok(Payload::Roster(roster).framed()?)
    }

    fn roster_broadcast(&self) -> Result<ServerAction, DriverError> {
        Ok(ServerAction::Broadcast { sessions: self.sessions(), frame: self.roster_frame()? })
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{FrameHeader, Opcode, payloads::presence::AnnounceIdentity};

    use super::*;
    use crate::SystemEnv;

    fn driver() -> ServerDriver<SystemEnv> {
        ServerDriver::new(SystemEnv::new(), DriverConfig::default())
    }

    fn announce(name: &str) -> Frame {
        Payload::AnnounceIdentity(AnnounceIdentity { name: name.to_string() }).framed().unwrap()
    }

    fn frames_for(actions: &[ServerAction], target: u64) -> Vec<Payload> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::SendToSession { session_id, frame } if *session_id == target => {
                    Some(frame)
                },
                ServerAction::Broadcast { sessions, frame } if sessions.contains(&target) => {
                    Some(frame)
                },
                _ => None,
            })
            .map(|f| Payload::from_frame(f).unwrap())
            .collect()
    }

    fn connect(driver: &mut ServerDriver<SystemEnv>, session_id: u64) {
        driver.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();
    }

    #[test]
    fn announce_broadcasts_to_every_connection() {
        let mut driver = driver();
        connect(&mut driver, 1);
        connect(&mut driver, 2);

        let actions = driver
            .process_event(ServerEvent::FrameReceived { session_id: 1, frame: announce("alice") })
            .unwrap();

        // Session 2 never announced but still receives the roster.
        for session in [1, 2] {
            let frames = frames_for(&actions, session);
            assert_eq!(frames.len(), 1);
            let Payload::Roster(roster) = &frames[0] else { panic!("expected roster") };
            assert_eq!(roster.entries.len(), 1);
            assert_eq!(roster.entries[0].name, "alice");
        }
    }

    #[test]
    fn invalid_name_only_answers_caller() {
        let mut driver = driver();
        connect(&mut driver, 1);
        connect(&mut driver, 2);

        for bad in ["", "   ", "me"] {
            let actions = driver
                .process_event(ServerEvent::FrameReceived { session_id: 1, frame: announce(bad) })
                .unwrap();

            assert!(frames_for(&actions, 2).is_empty());
            let frames = frames_for(&actions, 1);
            assert!(matches!(
                &frames[..],
                [Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_NAME, .. })]
            ));
        }
        assert!(driver.registry().is_empty());
    }

    #[test]
    fn announced_name_is_trimmed() {
        let mut driver = driver();
        connect(&mut driver, 1);
        driver
            .process_event(ServerEvent::FrameReceived { session_id: 1, frame: announce(" bob ") })
            .unwrap();

        assert_eq!(driver.registry().name_of(1), Some("bob"));
    }

    #[test]
    fn server_push_opcodes_are_rejected() {
        let mut driver = driver();
        connect(&mut driver, 1);

        let frame = Payload::Roster(Roster::default()).framed().unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        assert!(matches!(
            &frames_for(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::UNEXPECTED_OPCODE, .. })]
        ));
    }

    #[test]
    fn undecodable_payload_is_rejected() {
        let mut driver = driver();
        connect(&mut driver, 1);

        let frame = Frame::new(FrameHeader::new(Opcode::SendMessage), vec![0xFF]);
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        assert!(matches!(
            &frames_for(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })]
        ));
    }

    #[test]
    fn frame_from_unknown_session_is_an_error() {
        let mut driver = driver();
        let result = driver.process_event(ServerEvent::FrameReceived {
            session_id: 99,
            frame: announce("ghost"),
        });
        assert_eq!(result.unwrap_err(), DriverError::SessionNotFound(99));
    }

    #[test]
    fn max_connections_closes_extra() {
        let mut driver =
            ServerDriver::new(SystemEnv::new(), DriverConfig { max_connections: 1, ..Default::default() });
        connect(&mut driver, 1);

        let actions =
            driver.process_event(ServerEvent::ConnectionAccepted { session_id: 2 }).unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::CloseConnection { session_id: 2, .. }
        )));
        assert!(!driver.is_connected(2));
        assert_eq!(driver.connection_count(), 1);
    }

    #[test]
    fn close_of_unannounced_session_still_broadcasts() {
        let mut driver = driver();
        connect(&mut driver, 1);
        connect(&mut driver, 2);

        let actions = driver
            .process_event(ServerEvent::ConnectionClosed { session_id: 2, reason: "bye".into() })
            .unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Broadcast { sessions, .. } if sessions == &vec![1]
        )));
    }

    fn send(driver: &mut ServerDriver<SystemEnv>, from: u64, recipient: u64, text: &str) -> Vec<ServerAction> {
        let frame = Payload::SendMessage(SendMessage { recipient, text: text.to_string() })
            .framed()
            .unwrap();
        driver.process_event(ServerEvent::FrameReceived { session_id: from, frame }).unwrap()
    }

    fn announced(names: &[(u64, &str)]) -> ServerDriver<SystemEnv> {
        let mut driver = driver();
        for &(session_id, name) in names {
            connect(&mut driver, session_id);
            driver
                .process_event(ServerEvent::FrameReceived { session_id, frame: announce(name) })
                .unwrap();
        }
        driver
    }

    #[test]
    fn relays_trimmed_text_with_echo() {
        let mut driver = announced(&[(1, "alice"), (2, "bob")]);

        let actions = send(&mut driver, 2, 1, "  hi \n");

        let Payload::Message(relayed) = &frames_for(&actions, 1)[0] else { panic!("expected relay") };
        assert_eq!((relayed.author.as_str(), relayed.text.as_str()), ("bob", "hi"));
        let Payload::Message(echo) = &frames_for(&actions, 2)[0] else { panic!("expected echo") };
        assert_eq!((echo.author.as_str(), echo.text.as_str()), (SELF_MARKER, "hi"));
    }

    #[test]
    fn whitespace_only_text_is_dropped() {
        let mut driver = announced(&[(1, "alice"), (2, "bob")]);

        for blank in ["", "   ", "\t\n"] {
            let actions = send(&mut driver, 2, 1, blank);
            assert!(actions.iter().all(|a| matches!(a, ServerAction::Log { .. })));
        }
    }

    #[test]
    fn relay_that_outgrows_frame_limit_is_rejected() {
        let long_a = "a".repeat(DEFAULT_MAX_NAME_LEN);
        let long_b = "b".repeat(DEFAULT_MAX_NAME_LEN);
        let mut driver = announced(&[(1, long_a.as_str()), (2, long_b.as_str())]);

        let limit = FrameHeader::MAX_PAYLOAD_SIZE as usize;
        let text = "x".repeat(limit - 30);
        let request =
            Payload::SendMessage(SendMessage { recipient: 1, text: text.clone() }).framed().unwrap();
        assert!(request.payload.len() <= limit);

        let actions = send(&mut driver, 2, 1, &text);

        assert!(frames_for(&actions, 1).is_empty());
        assert!(matches!(
            &frames_for(&actions, 2)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })]
        ));

        // The sender can keep talking.
        let actions = send(&mut driver, 2, 1, "after");
        assert_eq!(frames_for(&actions, 1).len(), 1);
    }

    #[test]
    fn malformed_frame_answers_sender_only() {
        let mut driver = announced(&[(1, "alice"), (2, "bob")]);

        let actions = driver
            .process_event(ServerEvent::MalformedFrame { session_id: 1, reason: "bad magic".into() })
            .unwrap();

        assert!(frames_for(&actions, 2).is_empty());
        assert!(matches!(
            &frames_for(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })]
        ));
        assert_eq!(driver.registry().name_of(1), Some("alice"));

        let unknown =
            driver.process_event(ServerEvent::MalformedFrame { session_id: 9, reason: "x".into() });
        assert_eq!(unknown.unwrap_err(), DriverError::SessionNotFound(9));
    }

    #[test]
    fn close_of_unknown_session_is_quiet() {
        let mut driver = driver();
        let actions = driver
            .process_event(ServerEvent::ConnectionClosed { session_id: 5, reason: "bye".into() })
            .unwrap();
        assert!(actions.iter().all(|a| matches!(a, ServerAction::Log { .. })));
    }
}
