//! Real QUIC server, real QUIC clients.

use std::time::Duration;

use parley_client::{
    ClientAction, ConnectionState, Driver, ReconnectPolicy, Runtime,
    transport::{QuicDriver, TransportConfig},
};
use parley_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::{ErrorPayload, chat::SendMessage, presence::AnnounceIdentity},
};
use parley_server::{Server, ServerRuntimeConfig, SystemEnv};
use tokio::time::timeout;
use zerocopy::FromBytes;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> String {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..ServerRuntimeConfig::default()
    };
    let server = Server::bind(config).unwrap();
    let addr = server.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

fn driver() -> QuicDriver {
    QuicDriver::new(TransportConfig {
        connect_timeout: Duration::from_secs(2),
        ..TransportConfig::default()
    })
}

fn announce(name: &str) -> Frame {
    Payload::AnnounceIdentity(AnnounceIdentity { name: name.to_string() }).framed().unwrap()
}

async fn recv(driver: &mut QuicDriver) -> Payload {
    let frame = timeout(WAIT, driver.recv_frame())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    Payload::from_frame(&frame).unwrap()
}

async fn recv_roster(driver: &mut QuicDriver) -> Vec<(u64, String)> {
    match recv(driver).await {
        Payload::Roster(roster) => {
            roster.entries.into_iter().map(|e| (e.connection_id, e.name)).collect()
        },
        other => panic!("expected roster, got {other:?}"),
    }
}

#[tokio::test]
async fn announce_roster_and_relay() {
    let addr = start_server().await;

    let mut alice = driver();
    alice.connect(&addr).await.unwrap();
    alice.send_frame(announce("alice")).await.unwrap();
    let roster = recv_roster(&mut alice).await;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].1, "alice");
    let alice_id = roster[0].0;

    let mut bob = driver();
    bob.connect(&addr).await.unwrap();
    bob.send_frame(announce("  bob ")).await.unwrap();

    let names: Vec<_> = recv_roster(&mut alice).await.into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, ["alice", "bob"]);
    let names: Vec<_> = recv_roster(&mut bob).await.into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, ["alice", "bob"]);

    let message = SendMessage { recipient: alice_id, text: "hi".to_string() };
    bob.send_frame(Payload::SendMessage(message).framed().unwrap()).await.unwrap();

    match recv(&mut alice).await {
        Payload::Message(m) => assert_eq!((m.author.as_str(), m.text.as_str()), ("bob", "hi")),
        other => panic!("expected message, got {other:?}"),
    }
    match recv(&mut bob).await {
        Payload::Message(m) => assert_eq!((m.author.as_str(), m.text.as_str()), ("me", "hi")),
        other => panic!("expected echo, got {other:?}"),
    }

    bob.disconnect();
    let names: Vec<_> = recv_roster(&mut alice).await.into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, ["alice"]);
}

#[tokio::test]
async fn invalid_name_gets_error_frame() {
    let addr = start_server().await;

    let mut client = driver();
    client.connect(&addr).await.unwrap();
    client.send_frame(announce("   ")).await.unwrap();

    match recv(&mut client).await {
        Payload::Error(error) => assert_eq!(error.code, 1),
        other => panic!("expected error, got {other:?}"),
    }
}

fn send_message(recipient: u64, text: String) -> Frame {
    Payload::SendMessage(SendMessage { recipient, text }).framed().unwrap()
}

/// Next non-roster payload.
async fn recv_skipping_rosters(driver: &mut QuicDriver) -> Payload {
    loop {
        match recv(driver).await {
            Payload::Roster(_) => {},
            other => return other,
        }
    }
}

/// Connect and announce, returning the ID the server assigned.
async fn join(addr: &str, name: &str) -> (QuicDriver, u64) {
    let mut client = driver();
    client.connect(addr).await.unwrap();
    client.send_frame(announce(name)).await.unwrap();
    loop {
        let roster = recv_roster(&mut client).await;
        if let Some((id, _)) = roster.into_iter().find(|(_, n)| n == name) {
            return (client, id);
        }
    }
}

#[tokio::test]
async fn bad_magic_gets_invalid_payload_error() {
    let addr = start_server().await;

    let mut client = driver();
    client.connect(&addr).await.unwrap();

    let mut raw = FrameHeader::new(Opcode::RequestRoster).to_bytes();
    raw[..4].copy_from_slice(b"NOPE");
    let header = FrameHeader::read_from_bytes(&raw[..]).unwrap();
    client.send_frame(Frame::new(header, Vec::new())).await.unwrap();

    match recv(&mut client).await {
        Payload::Error(error) => assert_eq!(error.code, ErrorPayload::INVALID_PAYLOAD),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_relay_is_refused_and_sender_keeps_going() {
    let addr = start_server().await;
    let long_a = "a".repeat(64);
    let long_b = "b".repeat(64);

    let (mut alice, alice_id) = join(&addr, &long_a).await;
    let (mut bob, _) = join(&addr, &long_b).await;

    let text = "x".repeat(FrameHeader::MAX_PAYLOAD_SIZE as usize - 30);
    let big = send_message(alice_id, text);
    assert!(big.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize);
    bob.send_frame(big).await.unwrap();

    match recv_skipping_rosters(&mut bob).await {
        Payload::Error(error) => assert_eq!(error.code, ErrorPayload::INVALID_PAYLOAD),
        other => panic!("expected error, got {other:?}"),
    }

    bob.send_frame(send_message(alice_id, "after".to_string())).await.unwrap();
    match recv_skipping_rosters(&mut alice).await {
        Payload::Message(m) => assert_eq!(m.text, "after"),
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_reader_does_not_block_others() {
    let addr = start_server().await;

    // Alice joins and then never reads again.
    let (_alice, alice_id) = join(&addr, "alice").await;
    let (mut bob, _) = join(&addr, "bob").await;

    // Far more than alice's flow-control window and local buffering.
    for _ in 0..300 {
        bob.send_frame(send_message(alice_id, "y".repeat(64 * 1024))).await.unwrap();
    }

    let carol_joined = timeout(Duration::from_secs(10), join(&addr, "carol")).await;
    assert!(carol_joined.is_ok(), "carol never got a roster while alice was not reading");
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let mut client = QuicDriver::new(TransportConfig {
        connect_timeout: Duration::from_millis(300),
        ..TransportConfig::default()
    });

    assert!(client.connect("127.0.0.1:9").await.is_err());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn runtimes_converge_over_quic() {
    let addr = start_server().await;
    let policy = ReconnectPolicy { max_attempts: 3, delay: Duration::from_millis(50) };

    let (alice, mut alice_handle) =
        Runtime::new(driver(), SystemEnv::new(), "alice", addr.clone(), policy).unwrap();
    let (bob, mut bob_handle) =
        Runtime::new(driver(), SystemEnv::new(), "bob", addr, policy).unwrap();
    let alice_task = tokio::spawn(alice.run());
    let bob_task = tokio::spawn(bob.run());

    // Alice learns about bob; bob learns about alice.
    let bob_id = wait_for_peer(&mut alice_handle, "bob").await;
    wait_for_peer(&mut bob_handle, "alice").await;

    alice_handle.send(bob_id, "hello bob").await.unwrap();

    let received = timeout(WAIT, async {
        loop {
            match bob_handle.next_update().await {
                Some(ClientAction::MessageAppended { message, .. }) => break message,
                Some(_) => {},
                None => panic!("bob runtime stopped"),
            }
        }
    })
    .await
    .expect("bob never received the message");
    assert_eq!(received.author, "alice");
    assert_eq!(received.text, "hello bob");
    assert!(!received.own);

    alice_handle.shutdown().await.unwrap();
    bob_handle.shutdown().await.unwrap();
    assert!(alice_task.await.unwrap().is_ok());
    assert!(bob_task.await.unwrap().is_ok());
}

async fn wait_for_peer(handle: &mut parley_client::RuntimeHandle, name: &str) -> u64 {
    timeout(WAIT, async {
        let mut connected = false;
        loop {
            match handle.next_update().await {
                Some(ClientAction::StateChanged(ConnectionState::Connected)) => connected = true,
                Some(ClientAction::PeersChanged { peers }) => {
                    if let Some(peer) = peers.iter().find(|p| p.name == name) {
                        assert!(connected);
                        return peer.connection_id;
                    }
                },
                Some(_) => {},
                None => panic!("runtime stopped"),
            }
        }
    })
    .await
    .expect("peer never appeared")
}
