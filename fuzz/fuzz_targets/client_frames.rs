//! Fuzz target for the client reconciler
//!
//! Arbitrary server frames and user commands against one client. Whatever the
//! server says, the client's view must stay self-consistent.
//!
//! # Invariants
//!
//! - The peer view never contains the client itself
//! - A selection always points into the peer view
//! - Every conversation log belongs to a peer in the view
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_client::{Client, ClientEvent, ConversationKey};
use parley_harness::SimEnv;
use parley_proto::{
    Frame, Payload,
    payloads::{
        chat::RelayedMessage,
        presence::{Roster, RosterEntry},
    },
};

const NAMES: [&str; 4] = ["alice", "bob", "carol", "me"];

#[derive(Debug, Arbitrary)]
enum Input {
    Connected,
    Disconnected,
    Roster(Vec<(u8, u8)>),
    Message { author: u8, text: String },
    Raw(Vec<u8>),
    Send { peer: u8, text: String },
    Select(u8),
    ClearSelection,
}

fn frame(payload: Payload) -> Option<Frame> {
    payload.framed().ok()
}

fn event(input: Input) -> Option<ClientEvent> {
    let name = |n: u8| NAMES[usize::from(n) % NAMES.len()].to_string();
    Some(match input {
        Input::Connected => ClientEvent::TransportConnected,
        Input::Disconnected => ClientEvent::TransportDisconnected { reason: "fuzz".to_string() },
        Input::Roster(entries) => {
            let entries = entries
                .into_iter()
                .map(|(id, n)| RosterEntry { connection_id: u64::from(id % 8), name: name(n) })
                .collect();
            ClientEvent::FrameReceived(frame(Payload::Roster(Roster { entries }))?)
        },
        Input::Message { author, text } => ClientEvent::FrameReceived(frame(Payload::Message(
            RelayedMessage { author: name(author), text },
        ))?),
        Input::Raw(bytes) => ClientEvent::FrameReceived(Frame::decode(&bytes).ok()?),
        Input::Send { peer, text } => ClientEvent::SendMessage { peer: u64::from(peer % 8), text },
        Input::Select(peer) => ClientEvent::SelectPeer(u64::from(peer % 8)),
        Input::ClearSelection => ClientEvent::ClearSelection,
    })
}

fuzz_target!(|inputs: Vec<Input>| {
    let Ok(mut client) = Client::new(SimEnv::with_seed(0), "alice") else { return };

    for input in inputs {
        let Some(event) = event(input) else { continue };
        let _ = client.handle(event);

        assert!(client.peers().iter().all(|p| p.name != client.name()));
        if let Some(selected) = client.selected() {
            assert!(client.peer(selected).is_some());
        }
        for key in client.conversation_keys() {
            if let ConversationKey::Peer(peer) = key {
                assert!(client.peer(peer).is_some());
            }
        }
    }
});
