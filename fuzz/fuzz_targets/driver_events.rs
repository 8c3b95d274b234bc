//! Fuzz target for the server driver state machine
//!
//! # Strategy
//!
//! - Accept and close on a small session space so they collide
//! - Announce names from a small pool so eviction happens
//! - Raw frame bytes alongside well-formed requests
//!
//! # Invariants
//!
//! - Each name registered at most once
//! - Every registered session is a live connection
//! - Every roster pushed equals the registry at that moment
//! - NEVER panic on any event sequence

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_harness::SimEnv;
use parley_proto::{
    Frame, Payload,
    payloads::{chat::SendMessage, presence::AnnounceIdentity},
};
use parley_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent};

const NAMES: [&str; 6] = ["alice", "bob", "alice ", "me", "", "carol"];

#[derive(Debug, Arbitrary)]
enum Input {
    Accept(u8),
    Close(u8),
    Announce { session: u8, name: u8 },
    RequestRoster(u8),
    Send { session: u8, recipient: u8, text: String },
    Raw { session: u8, bytes: Vec<u8> },
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    max_connections: u8,
    inputs: Vec<Input>,
}

fn frame(payload: Payload) -> Option<Frame> {
    payload.framed().ok()
}

fn event(input: Input) -> Option<ServerEvent> {
    let session = |s: u8| u64::from(s % 8);
    Some(match input {
        Input::Accept(s) => ServerEvent::ConnectionAccepted { session_id: session(s) },
        Input::Close(s) => {
            ServerEvent::ConnectionClosed { session_id: session(s), reason: "fuzz".to_string() }
        },
        Input::Announce { session: s, name } => ServerEvent::FrameReceived {
            session_id: session(s),
            frame: frame(Payload::AnnounceIdentity(AnnounceIdentity {
                name: NAMES[usize::from(name) % NAMES.len()].to_string(),
            }))?,
        },
        Input::RequestRoster(s) => ServerEvent::FrameReceived {
            session_id: session(s),
            frame: frame(Payload::RequestRoster)?,
        },
        Input::Send { session: s, recipient, text } => ServerEvent::FrameReceived {
            session_id: session(s),
            frame: frame(Payload::SendMessage(SendMessage { recipient: session(recipient), text }))?,
        },
        Input::Raw { session: s, bytes } => {
            ServerEvent::FrameReceived { session_id: session(s), frame: Frame::decode(&bytes).ok()? }
        },
    })
}

fuzz_target!(|scenario: Scenario| {
    let config = DriverConfig {
        max_connections: usize::from(scenario.max_connections % 8) + 1,
        ..DriverConfig::default()
    };
    let mut driver = ServerDriver::new(SimEnv::with_seed(scenario.seed), config);

    for input in scenario.inputs {
        let Some(event) = event(input) else { continue };
        let Ok(actions) = driver.process_event(event) else { continue };

        let registry = driver.registry().snapshot();
        for action in &actions {
            let frame = match action {
                ServerAction::Broadcast { frame, .. } | ServerAction::SendToSession { frame, .. } => {
                    frame
                },
                _ => continue,
            };
            if let Ok(Payload::Roster(roster)) = Payload::from_frame(frame) {
                assert_eq!(roster.entries, registry);
            }
        }

        let mut names = HashSet::new();
        for entry in &registry {
            assert!(names.insert(entry.name.clone()), "duplicate name {:?}", entry.name);
            assert!(driver.is_connected(entry.connection_id));
            assert_ne!(entry.name, "me");
        }
        assert!(driver.connection_count() <= driver.config().max_connections);
    }
});
