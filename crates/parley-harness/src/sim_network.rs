//! In-memory network: one server driver, many clients.
//!
//! Frames travel as queued hops and are delivered one [`SimNetwork::step`] at
//! a time. By default delivery is FIFO, like one QUIC stream per direction.
//! [`Chaos`] can reorder hops and deliver server pushes twice, which is what
//! the client reconciler has to survive. Holding a client parks every frame
//! addressed to it until tests deliver them by hand or release the hold.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use parley_client::{Client, ClientAction, ClientError, ClientEvent, ConnectionState};
use parley_core::{ConnectionId, Environment};
use parley_proto::Frame;
use parley_server::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};

use crate::{
    invariants::{ClientSnapshot, SystemSnapshot},
    sim_env::SimEnv,
};

/// Upper bound for [`SimNetwork::run_until_quiet`]; a run this long is a
/// livelock, not a workload.
const MAX_STEPS: usize = 100_000;

/// Delivery perturbations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chaos {
    /// Deliver hops in random order instead of FIFO.
    pub reorder: bool,
    /// Chance in percent that a server → client frame is delivered twice.
    pub duplicate_percent: u8,
}

/// One frame in flight.
#[derive(Debug, Clone)]
enum Hop {
    ToServer { from: ConnectionId, frame: Frame },
    ToClient { to: ConnectionId, frame: Frame },
}

impl Hop {
    fn touches(&self, session: ConnectionId) -> bool {
        match self {
            Self::ToServer { from, .. } => *from == session,
            Self::ToClient { to, .. } => *to == session,
        }
    }
}

/// A client and everything it reported.
struct SimClient {
    client: Client<SimEnv>,
    updates: Vec<ClientAction>,
}

/// Deterministic network of one [`ServerDriver`] and many [`Client`]s.
pub struct SimNetwork {
    env: SimEnv,
    server: ServerDriver<SimEnv>,
    clients: BTreeMap<ConnectionId, SimClient>,
    in_flight: VecDeque<Hop>,
    held: BTreeSet<ConnectionId>,
    chaos: Chaos,
}

impl SimNetwork {
    /// Network with default server limits.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, DriverConfig::default())
    }

    /// Network with custom server limits.
    pub fn with_config(seed: u64, config: DriverConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let server = ServerDriver::new(env.clone(), config);
        Self {
            env,
            server,
            clients: BTreeMap::new(),
            in_flight: VecDeque::new(),
            held: BTreeSet::new(),
            chaos: Chaos::default(),
        }
    }

    /// Enable delivery perturbations.
    #[must_use]
    pub fn with_chaos(mut self, chaos: Chaos) -> Self {
        self.chaos = chaos;
        self
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The server driver.
    pub fn server(&self) -> &ServerDriver<SimEnv> {
        &self.server
    }

    /// Client on `session`.
    pub fn client(&self, session: ConnectionId) -> Option<&Client<SimEnv>> {
        self.clients.get(&session).map(|c| &c.client)
    }

    /// Sessions of every client, connected or not, ascending.
    pub fn sessions(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    /// Hops not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drain what a client reported since the last call (everything except
    /// frames and logs).
    pub fn take_updates(&mut self, session: ConnectionId) -> Vec<ClientAction> {
        self.clients.get_mut(&session).map(|c| std::mem::take(&mut c.updates)).unwrap_or_default()
    }

    /// Connect a new client named `name`. Returns its session.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidName` if the client refuses the name locally.
    pub fn connect(&mut self, name: &str) -> Result<ConnectionId, ClientError> {
        let client = Client::new(self.env.clone(), name)?;
        Ok(self.attach(SimClient { client, updates: Vec::new() }))
    }

    /// Drop the transport of `session`. Undelivered hops to and from it are
    /// lost. Returns `false` if the session is unknown.
    pub fn disconnect(&mut self, session: ConnectionId) -> bool {
        if !self.clients.contains_key(&session) {
            return false;
        }

        self.in_flight.retain(|hop| !hop.touches(session));
        if self.server.is_connected(session) {
            self.server_event(ServerEvent::ConnectionClosed {
                session_id: session,
                reason: "transport lost".to_string(),
            });
        }
        self.client_event(session, ClientEvent::TransportDisconnected {
            reason: "transport lost".to_string(),
        });
        true
    }

    /// Reconnect the client of `session` on a fresh session, keeping its
    /// local state. Returns the new session.
    pub fn reconnect(&mut self, session: ConnectionId) -> Option<ConnectionId> {
        if self.client(session)?.state() != ConnectionState::Disconnected {
            self.disconnect(session);
        }
        let client = self.clients.remove(&session)?;
        Some(self.attach(client))
    }

    /// Send `text` from `session` to `peer`.
    ///
    /// # Errors
    ///
    /// Whatever the client's send preconditions reject.
    pub fn send(
        &mut self,
        session: ConnectionId,
        peer: ConnectionId,
        text: &str,
    ) -> Result<(), ClientError> {
        self.try_client_event(session, ClientEvent::SendMessage { peer, text: text.to_string() })
    }

    /// Select `peer` on the client of `session`.
    ///
    /// # Errors
    ///
    /// `ClientError::UnknownPeer` if `peer` is not in that client's view.
    pub fn select(&mut self, session: ConnectionId, peer: ConnectionId) -> Result<(), ClientError> {
        self.try_client_event(session, ClientEvent::SelectPeer(peer))
    }

    /// Clear the selection on the client of `session`.
    pub fn clear_selection(&mut self, session: ConnectionId) {
        self.client_event(session, ClientEvent::ClearSelection);
    }

    /// Park frames addressed to `session` until [`SimNetwork::release`].
    pub fn hold(&mut self, session: ConnectionId) {
        self.held.insert(session);
    }

    /// Resume normal delivery to `session`.
    pub fn release(&mut self, session: ConnectionId) {
        self.held.remove(&session);
    }

    /// Frames in flight to `session`.
    pub fn in_flight_to(&self, session: ConnectionId) -> usize {
        self.in_flight
            .iter()
            .filter(|hop| matches!(hop, Hop::ToClient { to, .. } if *to == session))
            .count()
    }

    /// Deliver the newest frame addressed to `session`, even if held.
    /// Returns `false` if there is none.
    pub fn deliver_latest_to(&mut self, session: ConnectionId) -> bool {
        let index = self
            .in_flight
            .iter()
            .rposition(|hop| matches!(hop, Hop::ToClient { to, .. } if *to == session));
        match index {
            Some(index) => self.deliver(index),
            None => false,
        }
    }

    /// Deliver one hop. Returns `false` if nothing deliverable was in flight.
    pub fn step(&mut self) -> bool {
        let candidates: Vec<usize> = self
            .in_flight
            .iter()
            .enumerate()
            .filter(|(_, hop)| match hop {
                Hop::ToServer { .. } => true,
                Hop::ToClient { to, .. } => !self.held.contains(to),
            })
            .map(|(index, _)| index)
            .collect();

        let index = match candidates.len() {
            0 => return false,
            n if self.chaos.reorder && n > 1 => candidates[self.env.below(n as u64) as usize],
            _ => candidates[0],
        };
        self.deliver(index)
    }

    fn deliver(&mut self, index: usize) -> bool {
        let Some(hop) = self.in_flight.remove(index) else {
            return false;
        };

        match hop {
            Hop::ToServer { from, frame } => {
                if self.server.is_connected(from) {
                    self.server_event(ServerEvent::FrameReceived { session_id: from, frame });
                }
            },
            Hop::ToClient { to, frame } => {
                if self.duplicates() {
                    self.in_flight.insert(index, Hop::ToClient { to, frame: frame.clone() });
                }
                self.client_event(to, ClientEvent::FrameReceived(frame));
            },
        }
        true
    }

    /// Deliver until nothing deliverable is in flight. Returns the number of
    /// steps.
    pub fn run_until_quiet(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step() {
            steps += 1;
        }
        steps
    }

    /// Capture server and client state.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            registry: self.server.registry().snapshot(),
            connections: self.server.sessions(),
            clients: self
                .clients
                .iter()
                .map(|(&session, c)| ClientSnapshot::capture(session, &c.client))
                .collect(),
        }
    }

    fn duplicates(&self) -> bool {
        self.chaos.duplicate_percent > 0
            && self.env.below(100) < u64::from(self.chaos.duplicate_percent)
    }

    /// Give `client` a fresh session and run the connect handshake.
    fn attach(&mut self, client: SimClient) -> ConnectionId {
        let session = loop {
            let candidate = self.env.random_u64();
            if !self.clients.contains_key(&candidate) && !self.server.is_connected(candidate) {
                break candidate;
            }
        };

        self.clients.insert(session, client);
        self.client_event(session, ClientEvent::TransportConnecting);
        self.server_event(ServerEvent::ConnectionAccepted { session_id: session });

        if self.server.is_connected(session) {
            self.client_event(session, ClientEvent::TransportConnected);
        }
        session
    }

    fn try_client_event(
        &mut self,
        session: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ClientError> {
        let sim = self.clients.get_mut(&session).ok_or(ClientError::NotConnected)?;
        let actions = sim.client.handle(event)?;
        self.route_client(session, actions);
        Ok(())
    }

    fn client_event(&mut self, session: ConnectionId, event: ClientEvent) {
        if let Err(e) = self.try_client_event(session, event) {
            tracing::debug!("client {} rejected event: {}", session, e);
        }
    }

    fn route_client(&mut self, session: ConnectionId, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Send(frame) => {
                    self.in_flight.push_back(Hop::ToServer { from: session, frame });
                },
                ClientAction::Log { message } => tracing::trace!("client {}: {}", session, message),
                other => {
                    if let Some(sim) = self.clients.get_mut(&session) {
                        sim.updates.push(other);
                    }
                },
            }
        }
    }

    /// Feed the server and execute its actions, including closes it asks for.
    fn server_event(&mut self, event: ServerEvent) {
        let mut events = VecDeque::from([event]);

        while let Some(event) = events.pop_front() {
            let actions = match self.server.process_event(event) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::debug!("server rejected event: {}", e);
                    continue;
                },
            };

            for action in actions {
                match action {
                    ServerAction::SendToSession { session_id, frame } => {
                        self.in_flight.push_back(Hop::ToClient { to: session_id, frame });
                    },
                    ServerAction::Broadcast { sessions, frame } => {
                        for to in sessions {
                            self.in_flight.push_back(Hop::ToClient { to, frame: frame.clone() });
                        }
                    },
                    ServerAction::CloseConnection { session_id, reason } => {
                        self.in_flight.retain(|hop| !hop.touches(session_id));
                        if self.server.is_connected(session_id) {
                            events.push_back(ServerEvent::ConnectionClosed {
                                session_id,
                                reason: reason.clone(),
                            });
                        }
                        self.client_event(session_id, ClientEvent::TransportDisconnected {
                            reason,
                        });
                    },
                    ServerAction::Log { level, message } => match level {
                        LogLevel::Debug => tracing::debug!("server: {}", message),
                        LogLevel::Info => tracing::info!("server: {}", message),
                        LogLevel::Warn => tracing::warn!("server: {}", message),
                        LogLevel::Error => tracing::error!("server: {}", message),
                    },
                }
            }
        }
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNetwork")
            .field("clients", &self.clients.len())
            .field("in_flight", &self.in_flight.len())
            .field("chaos", &self.chaos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_registers_after_delivery() {
        let mut net = SimNetwork::new(1);
        let alice = net.connect("alice").unwrap();

        assert!(net.server().registry().snapshot().is_empty());
        net.run_until_quiet();

        assert_eq!(net.server().registry().name_of(alice), Some("alice"));
        assert_eq!(net.client(alice).map(Client::state), Some(ConnectionState::Connected));
    }

    #[test]
    fn same_seed_same_sessions() {
        let mut a = SimNetwork::new(9);
        let mut b = SimNetwork::new(9);

        assert_eq!(a.connect("alice").unwrap(), b.connect("alice").unwrap());
    }

    #[test]
    fn max_connections_closes_extra_client() {
        let config = DriverConfig { max_connections: 1, ..DriverConfig::default() };
        let mut net = SimNetwork::with_config(2, config);

        net.connect("alice").unwrap();
        let bob = net.connect("bob").unwrap();
        net.run_until_quiet();

        assert_eq!(net.client(bob).map(Client::state), Some(ConnectionState::Disconnected));
        assert_eq!(net.server().connection_count(), 1);
    }

    #[test]
    fn disconnect_drops_hops() {
        let mut net = SimNetwork::new(3);
        let alice = net.connect("alice").unwrap();
        assert!(net.in_flight() > 0);

        assert!(net.disconnect(alice));

        assert_eq!(net.in_flight(), 0);
        assert!(!net.disconnect(12345));
    }
}
