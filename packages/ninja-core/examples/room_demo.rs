//! # Room Demo
//!
//! Three participants in one room over the in-memory transport:
//! 1. The host creates a passphrase-protected room
//! 2. Alice and Bob join with the same passphrase
//! 3. Alice's message reaches Bob through the host relay
//! 4. Mallory joins with the wrong passphrase and sees nothing
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=ninja_core=debug cargo run --example room_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use ninja_core::network::{MemoryNetwork, MemorySignalingHub};
use ninja_core::{spawn_session, SessionConfig, SessionCoordinator, SessionEvent, SessionHandle};

fn start(net: &MemoryNetwork, hub: &MemorySignalingHub, id: &str) -> SessionHandle {
    let (signaling, signals) = hub.register(id);
    let coordinator = SessionCoordinator::new(
        id,
        Arc::new(net.transport(id)),
        Arc::new(signaling),
        SessionConfig::default(),
    );
    let (handle, _task) = spawn_session(coordinator, signals).expect("Failed to start session");
    handle
}

fn watch(name: &'static str, handle: &SessionHandle) {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Message { from, message } => {
                    println!("   [{name}] {} (via {from}): {}", message.username(), message.text());
                }
                SessionEvent::PeerConnected { peer_id } => println!("   [{name}] connected to {peer_id}"),
                SessionEvent::PeerLeft { peer_id } => println!("   [{name}] {peer_id} left"),
                _ => {}
            }
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ninja_core=info".into()),
        )
        .init();

    println!("=================================================");
    println!("              NINJA ROOM DEMO");
    println!("=================================================\n");

    let net = MemoryNetwork::new();
    let hub = MemorySignalingHub::new();

    // =========================================================================
    // STEP 1: Host creates the room
    // =========================================================================
    println!("1. Host creates a room...\n");

    let host = start(&net, &hub, "host");
    watch("host", &host);
    let descriptor = host
        .create_room("lobby", "Lobby", "correct horse")
        .await
        .expect("Failed to create room");

    println!("   Room:        {}", descriptor.name);
    println!("   Salt:        {}", hex::encode(descriptor.salt.as_bytes()));
    println!(
        "   Fingerprint: {}",
        host.key_fingerprint().await.ok().flatten().unwrap_or_default()
    );
    println!();

    // =========================================================================
    // STEP 2: Alice and Bob join
    // =========================================================================
    println!("2. Alice and Bob join...\n");

    let alice = start(&net, &hub, "alice");
    let bob = start(&net, &hub, "bob");
    watch("alice", &alice);
    watch("bob", &bob);
    alice.join_room(descriptor.clone(), "correct horse").await.expect("Alice failed to join");
    bob.join_room(descriptor.clone(), "correct horse").await.expect("Bob failed to join");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!();

    // =========================================================================
    // STEP 3: Alice talks, the host relays
    // =========================================================================
    println!("3. Alice sends a message...\n");

    alice.send_message("hello from alice", "Alice").await.expect("Send failed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!();

    // =========================================================================
    // STEP 4: Wrong passphrase
    // =========================================================================
    println!("4. Mallory joins with the wrong passphrase...\n");

    let mallory = start(&net, &hub, "mallory");
    watch("mallory", &mallory);
    mallory.join_room(descriptor, "battery staple").await.expect("Mallory failed to join");
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.send_message("can mallory read this?", "Bob").await.expect("Send failed");
    mallory.send_message("let me in", "Mallory").await.expect("Send failed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("\n   (mallory saw nothing; the host dropped mallory's frame)\n");

    for handle in [&mallory, &bob, &alice, &host] {
        let _ = handle.shutdown().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("=================================================");
    println!("                 DEMO COMPLETE");
    println!("=================================================");
}
