//! Multi-participant room scenarios over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use ninja_core::network::{
    ChatEnvelope, LinkEvent, LinkPayload, MemoryNetwork, MemorySignalingHub, SignalEnvelope, TransportEvent,
};
use ninja_core::storage::{Persistence, SqliteStore};
use ninja_core::{spawn_session, Message, RoomDescriptor, SessionConfig, SessionCoordinator, SessionEvent};
use tokio::sync::{broadcast, mpsc};

struct Participant {
    session: SessionCoordinator,
    links: mpsc::UnboundedReceiver<LinkEvent>,
    signals: mpsc::UnboundedReceiver<SignalEnvelope>,
    events: broadcast::Receiver<SessionEvent>,
}

fn participant(net: &MemoryNetwork, hub: &MemorySignalingHub, id: &str) -> Participant {
    let (signaling, signals) = hub.register(id);
    let session = SessionCoordinator::new(
        id,
        Arc::new(net.transport(id)),
        Arc::new(signaling),
        SessionConfig::default(),
    );
    wrap(session, signals)
}

fn wrap(mut session: SessionCoordinator, signals: mpsc::UnboundedReceiver<SignalEnvelope>) -> Participant {
    let links = session.take_link_events().unwrap();
    let events = session.subscribe();
    Participant {
        session,
        links,
        signals,
        events,
    }
}

async fn settle(room: &mut [&mut Participant]) {
    loop {
        let mut progressed = false;
        for p in room.iter_mut() {
            while let Ok(event) = p.links.try_recv() {
                p.session.handle_link_event(event).await;
                progressed = true;
            }
            while let Ok(env) = p.signals.try_recv() {
                let _ = p.session.handle_signal(&env.from, env.signal).await;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

fn drain(p: &mut Participant) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = p.events.try_recv() {
        out.push(event);
    }
    out
}

/// Handle queued link events, collecting the ciphertext of inbound chat frames
async fn handle_collecting_ciphertext(p: &mut Participant) -> Vec<(String, String)> {
    let mut seen = Vec::new();
    while let Ok(event) = p.links.try_recv() {
        if let LinkPayload::Transport(TransportEvent::DataChannelMessage(data)) = &event.payload {
            if let Ok(ChatEnvelope::Chat { encrypted, .. }) = serde_json::from_slice(data) {
                seen.push((event.peer_id.clone(), encrypted));
            }
        }
        p.session.handle_link_event(event).await;
    }
    seen
}

fn messages(events: &[SessionEvent]) -> Vec<(String, Message)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Message { from, message } => Some((from.clone(), message.clone())),
            _ => None,
        })
        .collect()
}

/// Host plus `guests`, all joined and linked, event queues drained
async fn star(
    net: &MemoryNetwork,
    hub: &MemorySignalingHub,
    guests: &[&str],
) -> (Participant, Vec<Participant>, RoomDescriptor) {
    let mut host = participant(net, hub, "host");
    let descriptor = host
        .session
        .create_room("lobby", "Lobby", "correct horse")
        .await
        .unwrap();

    let mut joined = Vec::new();
    for id in guests {
        let mut guest = participant(net, hub, id);
        guest.session.join_room(&descriptor, "correct horse").await.unwrap();
        joined.push(guest);
    }

    {
        let mut all: Vec<&mut Participant> = joined.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }

    drain(&mut host);
    for guest in joined.iter_mut() {
        drain(guest);
    }
    (host, joined, descriptor)
}

#[tokio::test]
async fn test_host_relays_to_everyone_but_sender() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice", "bob", "carol"]).await;
    assert_eq!(host.session.peer_ids(), vec!["alice", "bob", "carol"]);

    let sent = guests[0].session.send_message("hi all", "Alice").await.unwrap();
    {
        let mut all: Vec<&mut Participant> = guests.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }

    let at_host = messages(&drain(&mut host));
    assert_eq!(at_host, vec![("alice".to_string(), sent.clone())]);

    assert!(messages(&drain(&mut guests[0])).is_empty());
    for guest in &mut guests[1..] {
        let received = messages(&drain(guest));
        assert_eq!(received, vec![("host".to_string(), sent.clone())]);
    }
}

#[tokio::test]
async fn test_relay_forwards_ciphertext_untouched() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice", "bob"]).await;

    guests[0].session.send_message("same bytes", "Alice").await.unwrap();

    let at_host = handle_collecting_ciphertext(&mut host).await;
    assert_eq!(at_host.len(), 1);
    assert_eq!(at_host[0].0, "alice");

    let at_bob = handle_collecting_ciphertext(&mut guests[1]).await;
    assert_eq!(at_bob, vec![("host".to_string(), at_host[0].1.clone())]);

    let received = messages(&drain(&mut guests[1]));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1.text(), "same bytes");
}

#[tokio::test]
async fn test_host_message_reaches_all_guests() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice", "bob"]).await;

    let sent = host.session.send_message("welcome", "Host").await.unwrap();
    {
        let mut all: Vec<&mut Participant> = guests.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }

    assert!(messages(&drain(&mut host)).is_empty());
    for guest in guests.iter_mut() {
        let received = messages(&drain(guest));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.text(), "welcome");
        assert_eq!(received[0].1, sent);
    }
}

#[tokio::test]
async fn test_wrong_passphrase_is_isolated() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, descriptor) = star(&net, &hub, &["alice"]).await;

    let mut mallory = participant(&net, &hub, "mallory");
    mallory.session.join_room(&descriptor, "battery staple").await.unwrap();
    let mut alice = guests.remove(0);
    settle(&mut [&mut host, &mut alice, &mut mallory]).await;

    // Linked, but keyed differently
    assert_eq!(host.session.peer_ids(), vec!["alice", "mallory"]);
    assert_ne!(host.session.key_fingerprint(), mallory.session.key_fingerprint());
    drain(&mut host);
    drain(&mut alice);
    drain(&mut mallory);

    alice.session.send_message("secret", "Alice").await.unwrap();
    mallory.session.send_message("spoof", "Mallory").await.unwrap();
    settle(&mut [&mut host, &mut alice, &mut mallory]).await;

    let at_host = messages(&drain(&mut host));
    assert_eq!(at_host.len(), 1);
    assert_eq!(at_host[0].1.text(), "secret");
    assert!(messages(&drain(&mut alice)).is_empty());
    assert!(messages(&drain(&mut mallory)).is_empty());

    // Room keeps working afterwards
    host.session.send_message("still here", "Host").await.unwrap();
    settle(&mut [&mut host, &mut alice, &mut mallory]).await;
    assert_eq!(messages(&drain(&mut alice)).len(), 1);
}

#[tokio::test]
async fn test_dm_reaches_only_target() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice", "bob"]).await;

    let dm = guests[0].session.send_dm("host", "psst", "Alice").await.unwrap();
    assert!(dm.is_dm());
    {
        let mut all: Vec<&mut Participant> = guests.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }

    assert_eq!(messages(&drain(&mut host)), vec![("alice".to_string(), dm)]);
    assert!(messages(&drain(&mut guests[1])).is_empty());
}

#[tokio::test]
async fn test_guest_leaving_is_seen_by_host() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice", "bob"]).await;

    guests[1].session.leave_room().await;
    assert!(guests[1].session.room_id().is_none());
    {
        let mut all: Vec<&mut Participant> = guests.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }

    let host_events = drain(&mut host);
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerLeft { peer_id } if peer_id == "bob")));
    assert_eq!(host.session.peer_ids(), vec!["alice"]);

    // Remaining guest is unaffected
    let sent = guests[0].session.send_message("just us", "Alice").await.unwrap();
    {
        let mut all: Vec<&mut Participant> = guests.iter_mut().collect();
        all.push(&mut host);
        settle(&mut all).await;
    }
    assert_eq!(messages(&drain(&mut host)), vec![("alice".to_string(), sent)]);
    assert!(messages(&drain(&mut guests[1])).is_empty());
}

#[tokio::test]
async fn test_transport_failure_drops_link_both_sides() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();
    let (mut host, mut guests, _) = star(&net, &hub, &["alice"]).await;
    let mut alice = guests.remove(0);

    net.fail_connection("host", "alice");
    settle(&mut [&mut host, &mut alice]).await;

    assert!(host.session.peer_ids().is_empty());
    assert!(alice.session.peer_ids().is_empty());
    assert!(drain(&mut host)
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerLeft { peer_id } if peer_id == "alice")));
    assert!(drain(&mut alice)
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerLeft { peer_id } if peer_id == "host")));

    // Still in the room, just alone
    assert_eq!(alice.session.room_id(), Some("lobby"));
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ninja.db");
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let (signaling, signals) = hub.register("host");
    let session = SessionCoordinator::new(
        "host",
        Arc::new(net.transport("host")),
        Arc::new(signaling),
        SessionConfig::default(),
    )
    .with_store(store);
    let mut host = wrap(session, signals);
    let descriptor = host.session.create_room("lobby", "Lobby", "pw").await.unwrap();

    let mut alice = participant(&net, &hub, "alice");
    alice.session.join_room(&descriptor, "pw").await.unwrap();
    settle(&mut [&mut host, &mut alice]).await;

    host.session.send_message("one", "Host").await.unwrap();
    alice.session.send_message("two", "Alice").await.unwrap();
    settle(&mut [&mut host, &mut alice]).await;

    let history = host.session.room_history().unwrap();
    let texts: Vec<&str> = history.iter().map(|m| m.text()).collect();
    assert_eq!(texts.len(), 2);
    assert!(texts.contains(&"one") && texts.contains(&"two"));
    drop(host);

    let reopened = SqliteStore::open(&path).unwrap();
    let room = reopened.load_room("lobby").unwrap().unwrap();
    assert_eq!(room.to_descriptor().salt, descriptor.salt);
    assert_eq!(reopened.load_messages("lobby", 100).unwrap().len(), 2);
}

#[tokio::test]
async fn test_relay_through_running_sessions() {
    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();

    let mut handles = Vec::new();
    for id in ["host", "alice", "bob"] {
        let (signaling, signals) = hub.register(id);
        let coordinator = SessionCoordinator::new(
            id,
            Arc::new(net.transport(id)),
            Arc::new(signaling),
            SessionConfig::default(),
        );
        let (handle, _task) = spawn_session(coordinator, signals).unwrap();
        handles.push(handle);
    }
    let mut bob_events = handles[2].subscribe();

    let descriptor = handles[0].create_room("lobby", "Lobby", "pw").await.unwrap();
    handles[1].join_room(descriptor.clone(), "pw").await.unwrap();
    handles[2].join_room(descriptor, "pw").await.unwrap();

    let wait = async {
        // Both guests linked to the host
        loop {
            let ids = handles[0].peer_ids().await.unwrap();
            let alice_ready = handles[1].peer_ids().await.unwrap() == vec!["host"];
            if ids == vec!["alice", "bob"] && alice_ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        loop {
            if let SessionEvent::PeerConnected { peer_id } = bob_events.recv().await.unwrap() {
                if peer_id == "host" {
                    break;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap();

    // Alice's own side may open a moment after the host's
    let (sent, (from, received)) = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = handles[1].send_message("via host", "Alice").await.unwrap();
            let got = tokio::time::timeout(Duration::from_millis(200), async {
                loop {
                    if let SessionEvent::Message { from, message } = bob_events.recv().await.unwrap() {
                        break (from, message);
                    }
                }
            })
            .await;
            if let Ok(got) = got {
                break (message, got);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(from, "host");
    assert_eq!(received.text(), sent.text());
    assert_eq!(received.user_id(), "alice");

    for handle in &handles {
        handle.shutdown().await.unwrap();
    }
}
