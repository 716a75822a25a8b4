//! # Session Event Loop
//!
//! Runs a [`SessionCoordinator`] as a task and exposes it through a
//! cloneable [`SessionHandle`].
//!
//! ## Event Loop Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EVENT LOOP                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                    ┌─────────────────────────┐    │
//! │  │  Command Rx     │───────────────────►│                         │    │
//! │  │  (SessionHandle)│                    │                         │    │
//! │  └─────────────────┘                    │       Event Loop        │    │
//! │                                          │                         │    │
//! │  ┌─────────────────┐                    │  tokio::select! {       │    │
//! │  │  Link Events    │───────────────────►│    command              │    │
//! │  │  (transports)   │                    │    link event           │    │
//! │  └─────────────────┘                    │    inbound signal       │    │
//! │                                          │  }                      │    │
//! │  ┌─────────────────┐                    │                         │    │
//! │  │  Signals        │───────────────────►│  one at a time,         │    │
//! │  │  (signaling)    │                    │  each to completion     │    │
//! │  └─────────────────┘                    └───────────┬─────────────┘    │
//! │                                                      │                  │
//! │                                                      ▼                  │
//! │                                          ┌─────────────────────────┐    │
//! │                                          │  SessionEvent broadcast │    │
//! │                                          │  (to subscribers)       │    │
//! │                                          └─────────────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop stops on [`SessionCommand::Shutdown`] or when every handle is
//! dropped, and leaves the active room on the way out.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{SessionCoordinator, SessionEvent};
use crate::error::{Error, Result};
use crate::messaging::Message;
use crate::network::{LinkEvent, MediaStream, SignalEnvelope};
use crate::room::RoomDescriptor;

/// Request to a running session
#[derive(Debug)]
pub enum SessionCommand {
    /// Create a room as host
    CreateRoom {
        /// Room id
        room_id: String,
        /// Room name
        name: String,
        /// Room passphrase
        passphrase: String,
        /// Reply with the descriptor to share
        reply: oneshot::Sender<Result<RoomDescriptor>>,
    },
    /// Join a room from its descriptor
    JoinRoom {
        /// Room descriptor
        descriptor: RoomDescriptor,
        /// Room passphrase
        passphrase: String,
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Rejoin a saved room
    JoinSavedRoom {
        /// Saved room id
        room_id: String,
        /// Room passphrase
        passphrase: String,
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Leave the active room
    LeaveRoom {
        /// Reply once done
        reply: oneshot::Sender<()>,
    },
    /// Broadcast a room message
    SendMessage {
        /// Message body
        text: String,
        /// Display name
        username: String,
        /// Reply with the sent message
        reply: oneshot::Sender<Result<Message>>,
    },
    /// Send a direct message
    SendDm {
        /// Target peer
        peer_id: String,
        /// Message body
        text: String,
        /// Display name
        username: String,
        /// Reply with the sent message
        reply: oneshot::Sender<Result<Message>>,
    },
    /// Ask the host to connect to a peer
    IntroducePeer {
        /// Peer to introduce
        peer_id: String,
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Share local media
    EnableVideo {
        /// Captured stream
        stream: MediaStream,
        /// Reply once attached
        reply: oneshot::Sender<()>,
    },
    /// Stop sharing local media
    DisableVideo {
        /// Reply once detached
        reply: oneshot::Sender<()>,
    },
    /// List linked peers
    PeerIds {
        /// Reply with sorted ids
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Linked peers plus self
    PeerCount {
        /// Reply with the count
        reply: oneshot::Sender<usize>,
    },
    /// Whether this participant hosts the active room
    IsHost {
        /// Reply
        reply: oneshot::Sender<bool>,
    },
    /// Fingerprint of the active room key
    KeyFingerprint {
        /// Reply
        reply: oneshot::Sender<Option<String>>,
    },
    /// Saved history of the active room
    RoomHistory {
        /// Reply with messages, oldest first
        reply: oneshot::Sender<Result<Vec<Message>>>,
    },
    /// Saved direct messages with one peer
    DmHistory {
        /// The other party
        peer_id: String,
        /// Reply with messages, oldest first
        reply: oneshot::Sender<Result<Vec<Message>>>,
    },
    /// Stop the loop
    Shutdown,
}

/// Cloneable handle on a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Subscribe to UI events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Create a room as host
    pub async fn create_room(&self, room_id: &str, name: &str, passphrase: &str) -> Result<RoomDescriptor> {
        self.request(|reply| SessionCommand::CreateRoom {
            room_id: room_id.to_string(),
            name: name.to_string(),
            passphrase: passphrase.to_string(),
            reply,
        })
        .await?
    }

    /// Join a room from its descriptor
    pub async fn join_room(&self, descriptor: RoomDescriptor, passphrase: &str) -> Result<()> {
        self.request(|reply| SessionCommand::JoinRoom {
            descriptor,
            passphrase: passphrase.to_string(),
            reply,
        })
        .await?
    }

    /// Rejoin a saved room
    pub async fn join_saved_room(&self, room_id: &str, passphrase: &str) -> Result<()> {
        self.request(|reply| SessionCommand::JoinSavedRoom {
            room_id: room_id.to_string(),
            passphrase: passphrase.to_string(),
            reply,
        })
        .await?
    }

    /// Leave the active room
    pub async fn leave_room(&self) -> Result<()> {
        self.request(|reply| SessionCommand::LeaveRoom { reply }).await
    }

    /// Broadcast a room message
    pub async fn send_message(&self, text: &str, username: &str) -> Result<Message> {
        self.request(|reply| SessionCommand::SendMessage {
            text: text.to_string(),
            username: username.to_string(),
            reply,
        })
        .await?
    }

    /// Send a direct message
    pub async fn send_dm(&self, peer_id: &str, text: &str, username: &str) -> Result<Message> {
        self.request(|reply| SessionCommand::SendDm {
            peer_id: peer_id.to_string(),
            text: text.to_string(),
            username: username.to_string(),
            reply,
        })
        .await?
    }

    /// Ask the host to connect to a peer
    pub async fn introduce_peer(&self, peer_id: &str) -> Result<()> {
        self.request(|reply| SessionCommand::IntroducePeer {
            peer_id: peer_id.to_string(),
            reply,
        })
        .await?
    }

    /// Share local media
    pub async fn enable_video(&self, stream: MediaStream) -> Result<()> {
        self.request(|reply| SessionCommand::EnableVideo { stream, reply }).await
    }

    /// Stop sharing local media
    pub async fn disable_video(&self) -> Result<()> {
        self.request(|reply| SessionCommand::DisableVideo { reply }).await
    }

    /// Linked peers, sorted
    pub async fn peer_ids(&self) -> Result<Vec<String>> {
        self.request(|reply| SessionCommand::PeerIds { reply }).await
    }

    /// Linked peers plus self
    pub async fn peer_count(&self) -> Result<usize> {
        self.request(|reply| SessionCommand::PeerCount { reply }).await
    }

    /// Whether this participant hosts the active room
    pub async fn is_host(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::IsHost { reply }).await
    }

    /// Fingerprint of the active room key
    pub async fn key_fingerprint(&self) -> Result<Option<String>> {
        self.request(|reply| SessionCommand::KeyFingerprint { reply }).await
    }

    /// Saved history of the active room, oldest first
    pub async fn room_history(&self) -> Result<Vec<Message>> {
        self.request(|reply| SessionCommand::RoomHistory { reply }).await?
    }

    /// Saved direct messages with `peer_id`, oldest first
    pub async fn dm_history(&self, peer_id: &str) -> Result<Vec<Message>> {
        self.request(|reply| SessionCommand::DmHistory {
            peer_id: peer_id.to_string(),
            reply,
        })
        .await?
    }

    /// Stop the session
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| Error::SessionClosed)
    }
}

/// Move `coordinator` onto its own task
///
/// `signals` is the inbound side of the signaling channel. Fails if the
/// coordinator's link events were already taken.
pub fn spawn_session(
    mut coordinator: SessionCoordinator,
    signals: mpsc::UnboundedReceiver<SignalEnvelope>,
) -> Result<(SessionHandle, JoinHandle<()>)> {
    let links = coordinator
        .take_link_events()
        .ok_or_else(|| Error::Internal("link events already taken".into()))?;

    let (command_tx, command_rx) = mpsc::channel(coordinator.config.command_capacity.max(1));
    let handle = SessionHandle {
        command_tx,
        event_tx: coordinator.event_sender(),
    };

    let task = tokio::spawn(run_session(coordinator, command_rx, links, signals));
    Ok((handle, task))
}

async fn run_session(
    mut coordinator: SessionCoordinator,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut links: mpsc::UnboundedReceiver<LinkEvent>,
    mut signals: mpsc::UnboundedReceiver<SignalEnvelope>,
) {
    tracing::info!(local_id = %coordinator.local_id(), "Session event loop starting");
    let mut signals_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SessionCommand::Shutdown) => {
                        tracing::info!("Shutdown command received, exiting event loop");
                        break;
                    }
                    Some(cmd) => handle_command(&mut coordinator, cmd).await,
                    None => {
                        tracing::info!("All session handles dropped, exiting event loop");
                        break;
                    }
                }
            }

            Some(event) = links.recv() => {
                coordinator.handle_link_event(event).await;
            }

            signal = signals.recv(), if signals_open => {
                match signal {
                    Some(envelope) => {
                        let kind = envelope.signal.kind();
                        if let Err(e) = coordinator.handle_signal(&envelope.from, envelope.signal).await {
                            tracing::warn!(from = %envelope.from, kind, error = %e, "Signal handling failed");
                        }
                    }
                    None => {
                        tracing::warn!("Signaling channel closed");
                        signals_open = false;
                    }
                }
            }
        }
    }

    coordinator.leave_room().await;
    tracing::info!("Session event loop stopped");
}

async fn handle_command(coordinator: &mut SessionCoordinator, command: SessionCommand) {
    match command {
        SessionCommand::CreateRoom {
            room_id,
            name,
            passphrase,
            reply,
        } => {
            let _ = reply.send(coordinator.create_room(&room_id, &name, &passphrase).await);
        }
        SessionCommand::JoinRoom {
            descriptor,
            passphrase,
            reply,
        } => {
            let _ = reply.send(coordinator.join_room(&descriptor, &passphrase).await);
        }
        SessionCommand::JoinSavedRoom {
            room_id,
            passphrase,
            reply,
        } => {
            let _ = reply.send(coordinator.join_saved_room(&room_id, &passphrase).await);
        }
        SessionCommand::LeaveRoom { reply } => {
            coordinator.leave_room().await;
            let _ = reply.send(());
        }
        SessionCommand::SendMessage { text, username, reply } => {
            let _ = reply.send(coordinator.send_message(&text, &username).await);
        }
        SessionCommand::SendDm {
            peer_id,
            text,
            username,
            reply,
        } => {
            let _ = reply.send(coordinator.send_dm(&peer_id, &text, &username).await);
        }
        SessionCommand::IntroducePeer { peer_id, reply } => {
            let _ = reply.send(coordinator.introduce_peer(&peer_id).await);
        }
        SessionCommand::EnableVideo { stream, reply } => {
            coordinator.enable_video(stream).await;
            let _ = reply.send(());
        }
        SessionCommand::DisableVideo { reply } => {
            coordinator.disable_video().await;
            let _ = reply.send(());
        }
        SessionCommand::PeerIds { reply } => {
            let _ = reply.send(coordinator.peer_ids());
        }
        SessionCommand::PeerCount { reply } => {
            let _ = reply.send(coordinator.peer_count());
        }
        SessionCommand::IsHost { reply } => {
            let _ = reply.send(coordinator.is_host());
        }
        SessionCommand::KeyFingerprint { reply } => {
            let _ = reply.send(coordinator.key_fingerprint());
        }
        SessionCommand::RoomHistory { reply } => {
            let _ = reply.send(coordinator.room_history());
        }
        SessionCommand::DmHistory { peer_id, reply } => {
            let _ = reply.send(coordinator.dm_history(&peer_id));
        }
        SessionCommand::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::network::{MemoryNetwork, MemorySignalingHub};
    use crate::session::SessionConfig;
    use crate::storage::MemoryStore;

    fn coordinator(
        net: &MemoryNetwork,
        hub: &MemorySignalingHub,
        id: &str,
    ) -> (SessionCoordinator, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (signaling, signals) = hub.register(id);
        let coordinator = SessionCoordinator::new(
            id,
            Arc::new(net.transport(id)),
            Arc::new(signaling),
            SessionConfig::default(),
        );
        (coordinator, signals)
    }

    fn spawn(net: &MemoryNetwork, hub: &MemorySignalingHub, id: &str) -> (SessionHandle, JoinHandle<()>) {
        let (coordinator, signals) = coordinator(net, hub, id);
        spawn_session(coordinator, signals).unwrap()
    }

    async fn next_message(events: &mut broadcast::Receiver<SessionEvent>) -> Message {
        loop {
            if let SessionEvent::Message { message, .. } = events.recv().await.unwrap() {
                return message;
            }
        }
    }

    async fn wait_connected(events: &mut broadcast::Receiver<SessionEvent>, peer: &str) {
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::PeerConnected { peer_id } if peer_id == peer => break,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_requires_link_events() {
        let net = MemoryNetwork::new();
        let hub = MemorySignalingHub::new();
        let (signaling, signals) = hub.register("a");
        let mut coordinator = SessionCoordinator::new(
            "a",
            Arc::new(net.transport("a")),
            Arc::new(signaling),
            SessionConfig::default(),
        );
        let _taken = coordinator.take_link_events();

        assert!(matches!(spawn_session(coordinator, signals), Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let net = MemoryNetwork::new();
        let hub = MemorySignalingHub::new();
        let (handle, task) = spawn(&net, &hub, "host");

        let descriptor = handle.create_room("r1", "Lobby", "pass").await.unwrap();
        assert_eq!(descriptor.host_id.as_deref(), Some("host"));
        assert!(handle.key_fingerprint().await.unwrap().is_some());

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(handle.peer_ids().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_two_sessions_exchange_messages() {
        let net = MemoryNetwork::new();
        let hub = MemorySignalingHub::new();
        let (host, _host_task) = spawn(&net, &hub, "host");
        let (alice, _alice_task) = spawn(&net, &hub, "alice");
        let mut host_events = host.subscribe();
        let mut alice_events = alice.subscribe();

        let descriptor = host.create_room("r1", "Lobby", "pass").await.unwrap();
        alice.join_room(descriptor, "pass").await.unwrap();

        let connected = async {
            wait_connected(&mut host_events, "alice").await;
            wait_connected(&mut alice_events, "host").await;
        };
        tokio::time::timeout(Duration::from_secs(5), connected).await.unwrap();

        let sent = alice.send_message("hello", "Alice").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let SessionEvent::Message { from, message } = host_events.recv().await.unwrap() {
                    break (from, message);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received.0, "alice");
        assert_eq!(received.1, sent);
        assert_eq!(host.peer_ids().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_queries_through_handle() {
        let net = MemoryNetwork::new();
        let hub = MemorySignalingHub::new();
        let (host_session, host_signals) = coordinator(&net, &hub, "host");
        let host_session = host_session.with_store(Arc::new(MemoryStore::new()));
        let (host, _host_task) = spawn_session(host_session, host_signals).unwrap();
        let (alice, _alice_task) = spawn(&net, &hub, "alice");
        let mut host_events = host.subscribe();
        let mut alice_events = alice.subscribe();

        assert_eq!(host.peer_count().await.unwrap(), 1);
        assert!(!host.is_host().await.unwrap());
        assert!(matches!(host.room_history().await, Err(Error::NotInRoom)));

        let descriptor = host.create_room("r1", "Lobby", "pass").await.unwrap();
        alice.join_room(descriptor, "pass").await.unwrap();
        let connected = async {
            wait_connected(&mut host_events, "alice").await;
            wait_connected(&mut alice_events, "host").await;
        };
        tokio::time::timeout(Duration::from_secs(5), connected).await.unwrap();

        assert_eq!(host.peer_count().await.unwrap(), 2);
        assert!(host.is_host().await.unwrap());
        assert!(!alice.is_host().await.unwrap());

        let room_msg = alice.send_message("to the room", "Alice").await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), next_message(&mut host_events))
            .await
            .unwrap();
        assert_eq!(received, room_msg);
        assert_eq!(host.room_history().await.unwrap(), vec![room_msg]);

        let dm = alice.send_dm("host", "just you", "Alice").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), next_message(&mut host_events))
            .await
            .unwrap();
        assert_eq!(host.dm_history("alice").await.unwrap(), vec![dm]);

        assert!(matches!(
            alice.dm_history("host").await,
            Err(Error::StorageNotInitialized)
        ));
    }
}
