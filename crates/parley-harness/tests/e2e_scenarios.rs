//! End-to-end scenarios over the simulated network.
//!
//! Real `ServerDriver` and real `Client`s, in-memory delivery.

use parley_client::{ClientAction, ClientError, ConversationKey, Message};
use parley_core::ConnectionId;
use parley_harness::{InvariantRegistry, SimNetwork};

fn log(net: &SimNetwork, session: ConnectionId, peer: ConnectionId) -> Vec<Message> {
    net.client(session)
        .and_then(|c| c.conversation(&ConversationKey::Peer(peer)))
        .map(|c| c.messages().to_vec())
        .unwrap_or_default()
}

fn holder_of(net: &SimNetwork, name: &str) -> Option<ConnectionId> {
    net.server().registry().snapshot().into_iter().find(|e| e.name == name).map(|e| e.connection_id)
}

fn pair(seed: u64) -> (SimNetwork, ConnectionId, ConnectionId) {
    let mut net = SimNetwork::new(seed);
    let alice = net.connect("alice").unwrap();
    let bob = net.connect("bob").unwrap();
    net.run_until_quiet();
    (net, alice, bob)
}

#[test]
fn hi_lands_once_in_both_logs() {
    let (mut net, alice, bob) = pair(7);

    net.select(alice, bob).unwrap();
    net.send(alice, bob, "hi").unwrap();
    net.run_until_quiet();

    let sent = log(&net, alice, bob);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].author, "alice");
    assert_eq!(sent[0].text, "hi");
    assert!(sent[0].own);

    let received = log(&net, bob, alice);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].author, "alice");
    assert_eq!(received[0].text, "hi");
    assert!(!received[0].own);

    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after hi");
}

#[test]
fn peer_disconnect_resets_selection_and_log() {
    let (mut net, alice, bob) = pair(11);
    net.select(alice, bob).unwrap();
    net.send(alice, bob, "hi").unwrap();
    net.run_until_quiet();
    net.take_updates(alice);

    net.disconnect(bob);
    net.run_until_quiet();

    let client = net.client(alice).unwrap();
    assert_eq!(client.selected(), None);
    assert!(client.peers().is_empty());
    assert!(client.conversation(&ConversationKey::Peer(bob)).is_none());

    let updates = net.take_updates(alice);
    assert!(updates.contains(&ClientAction::ConversationRemoved { peer: bob }));
    assert!(updates.contains(&ClientAction::SelectionChanged { selected: None }));

    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after bob left");
}

#[test]
fn roster_reaches_everyone_after_each_change() {
    let mut net = SimNetwork::new(3);
    let alice = net.connect("alice").unwrap();
    net.run_until_quiet();
    assert!(net.client(alice).unwrap().peers().is_empty());

    let bob = net.connect("bob").unwrap();
    let carol = net.connect("carol").unwrap();
    net.run_until_quiet();

    let names: Vec<_> =
        net.client(alice).unwrap().peers().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, ["bob", "carol"]);

    net.disconnect(carol);
    net.run_until_quiet();

    let peers: Vec<_> =
        net.client(bob).unwrap().peers().iter().map(|p| p.connection_id).collect();
    assert_eq!(peers, [alice]);
    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after carol left");
}

#[test]
fn duplicate_name_evicts_older_connection() {
    let (mut net, alice, bob) = pair(5);

    let alice2 = net.connect("alice").unwrap();
    net.run_until_quiet();

    assert_eq!(holder_of(&net, "alice"), Some(alice2));
    assert_eq!(net.server().registry().name_of(alice), None);

    let peers: Vec<_> =
        net.client(bob).unwrap().peers().iter().map(|p| p.connection_id).collect();
    assert_eq!(peers, [alice2]);
    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after eviction");
}

#[test]
fn message_to_vanished_recipient_is_silent() {
    let (mut net, alice, bob) = pair(13);
    net.hold(alice);
    net.disconnect(bob);
    net.run_until_quiet();

    // Alice has not seen the roster without bob yet.
    net.send(alice, bob, "anyone?").unwrap();
    let registry_before = net.server().registry().snapshot();
    net.release(alice);
    net.run_until_quiet();

    assert_eq!(net.server().registry().snapshot(), registry_before);
    let updates = net.take_updates(alice);
    assert!(!updates.iter().any(|u| matches!(u, ClientAction::ServerError { .. })));
    assert!(net.client(alice).unwrap().last_error().is_none());
}

#[test]
fn early_message_is_buffered_then_migrated() {
    let mut net = SimNetwork::new(17);
    let alice = net.connect("alice").unwrap();
    net.run_until_quiet();

    net.hold(alice);
    let bob = net.connect("bob").unwrap();
    net.run_until_quiet();
    net.send(bob, alice, "early").unwrap();
    net.run_until_quiet();

    // Message overtakes the roster that introduces bob.
    assert!(net.deliver_latest_to(alice));
    let pending = ConversationKey::Pending("bob".to_string());
    assert_eq!(net.client(alice).unwrap().conversation(&pending).map(|c| c.len()), Some(1));

    net.release(alice);
    net.run_until_quiet();

    let client = net.client(alice).unwrap();
    assert!(client.conversation(&pending).is_none());
    let texts: Vec<_> = log(&net, alice, bob).into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["early"]);
    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after migration");
}

#[test]
fn buffered_message_from_departed_author_leaves_no_trace() {
    let mut net = SimNetwork::new(19);
    let alice = net.connect("alice").unwrap();
    net.run_until_quiet();

    net.hold(alice);
    let carol = net.connect("carol").unwrap();
    net.run_until_quiet();
    net.send(carol, alice, "boo").unwrap();
    net.run_until_quiet();
    assert!(net.deliver_latest_to(alice));

    net.disconnect(carol);
    net.release(alice);
    net.run_until_quiet();

    let client = net.client(alice).unwrap();
    assert!(client.conversation_keys().is_empty());
    assert!(client.peers().is_empty());
    InvariantRegistry::quiescent().assert_all(&net.snapshot(), "after carol left");
}

#[test]
fn reconnect_reannounces_and_rejoins_roster() {
    let (mut net, alice, bob) = pair(23);

    let alice2 = net.reconnect(alice).unwrap();
    net.run_until_quiet();

    assert_ne!(alice, alice2);
    assert_eq!(holder_of(&net, "alice"), Some(alice2));
    let peers: Vec<_> =
        net.client(bob).unwrap().peers().iter().map(|p| p.connection_id).collect();
    assert_eq!(peers, [alice2]);
    assert_eq!(net.client(alice2).unwrap().peers().len(), 1);
}

#[test]
fn send_preconditions_hold_end_to_end() {
    let (mut net, alice, bob) = pair(29);

    assert_eq!(net.send(alice, 424_242, "hi"), Err(ClientError::UnknownPeer(424_242)));
    assert!(matches!(net.send(alice, bob, "   "), Err(ClientError::InvalidInput(_))));
    assert_eq!(net.in_flight(), 0);

    net.disconnect(alice);
    assert_eq!(net.send(alice, bob, "hi"), Err(ClientError::NotConnected));
    assert!(net.client(alice).unwrap().conversation_keys().is_empty());
}
