//! # Session Module
//!
//! The session coordinator: one participant's view of one room.
//!
//! ## Star Relay
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ROOM TOPOLOGY                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                 ┌──────────┐                                            │
//! │        ┌───────►│   Host   │◄───────┐                                   │
//! │        │        └────┬─────┘        │                                   │
//! │        │             │              │                                   │
//! │   ┌────┴────┐   ┌────┴────┐   ┌────┴────┐                              │
//! │   │ Peer A  │   │ Peer B  │   │ Peer C  │                              │
//! │   └─────────┘   └─────────┘   └─────────┘                              │
//! │                                                                         │
//! │  A sends:   A ──chat──► Host                                           │
//! │  Host:      decrypt (deliver locally), then forward the SAME           │
//! │             envelope to B and C, never back to A                       │
//! │                                                                         │
//! │  Relays forward ciphertext; there is no per-hop re-encryption.         │
//! │  DMs are delivered to the host only, never forwarded.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! The coordinator is the single writer of its peer map and encryption
//! context: every mutating method takes `&mut self`. Transports and links
//! never call back in; they push [`LinkEvent`]s onto a channel that the
//! owner drains into [`SessionCoordinator::handle_link_event`].
//! [`spawn_session`] packages that as a task.

mod event_loop;
mod events;

pub use event_loop::{spawn_session, SessionCommand, SessionHandle};
pub use events::SessionEvent;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::messaging::{dm_conversation_id, Message};
use crate::network::{
    ChatEnvelope, ConnectionState, LinkConfig, LinkEvent, LinkEventSink, LinkPayload, MediaStream, PeerEvent,
    PeerLink, Role, Signal, SignalEnvelope, SignalingChannel, Transport,
};
use crate::room::{EncryptionContext, RoomDescriptor};
use crate::storage::{Persistence, RoomRecord, DEFAULT_HISTORY_LIMIT};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transport settings for every link
    pub link: LinkConfig,
    /// Capacity of the UI event broadcast channel
    pub event_capacity: usize,
    /// Capacity of the command channel of a spawned session
    pub command_capacity: usize,
    /// Rows returned by the history loaders
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            event_capacity: 256,
            command_capacity: 64,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct ActiveRoom {
    id: String,
    name: String,
    is_host: bool,
    host_id: Option<String>,
}

/// Coordinates one participant's links, room key and relay duties
pub struct SessionCoordinator {
    local_id: String,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    signaling: Arc<dyn SignalingChannel>,
    store: Option<Arc<dyn Persistence>>,
    encryption: EncryptionContext,
    peers: HashMap<String, PeerLink>,
    room: Option<ActiveRoom>,
    local_stream: Option<MediaStream>,
    next_link_id: u64,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    /// Create a coordinator for the participant `local_id`
    pub fn new(
        local_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        signaling: Arc<dyn SignalingChannel>,
        config: SessionConfig,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            local_id: local_id.into(),
            config,
            transport,
            signaling,
            store: None,
            encryption: EncryptionContext::new(),
            peers: HashMap::new(),
            room: None,
            local_stream: None,
            next_link_id: 0,
            link_tx,
            link_rx: Some(link_rx),
            event_tx,
        }
    }

    /// Attach a persistence backend for rooms and history
    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Take the receiver of link events
    ///
    /// Whoever drives the session must feed every event from it into
    /// [`handle_link_event`](Self::handle_link_event). Returns `None` after
    /// the first call.
    pub fn take_link_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.link_rx.take()
    }

    /// Subscribe to UI events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    // ========================================================================
    // ROOM LIFECYCLE
    // ========================================================================

    /// Create a room and become its host
    pub async fn create_room(&mut self, room_id: &str, name: &str, passphrase: &str) -> Result<RoomDescriptor> {
        self.ensure_no_room()?;

        let salt = self.encryption.init_room(room_id, passphrase).await?;
        self.room = Some(ActiveRoom {
            id: room_id.to_string(),
            name: name.to_string(),
            is_host: true,
            host_id: Some(self.local_id.clone()),
        });

        let descriptor = RoomDescriptor {
            room_id: room_id.to_string(),
            name: name.to_string(),
            salt,
            host_id: Some(self.local_id.clone()),
        };
        self.persist("room", |store| store.save_room(&RoomRecord::from_descriptor(&descriptor)));

        tracing::info!(room_id, name, "Created room as host");
        Ok(descriptor)
    }

    /// Join a room from its descriptor
    ///
    /// Connects to the host as initiator when the descriptor names one. If
    /// that fails the room is left again and the error returned.
    pub async fn join_room(&mut self, descriptor: &RoomDescriptor, passphrase: &str) -> Result<()> {
        self.ensure_no_room()?;

        self.encryption
            .join_room(&descriptor.room_id, passphrase, descriptor.salt)
            .await?;

        let host = descriptor.host_id.clone().filter(|h| !h.is_empty());
        self.room = Some(ActiveRoom {
            id: descriptor.room_id.clone(),
            name: descriptor.name.clone(),
            is_host: host.as_deref() == Some(self.local_id.as_str()),
            host_id: host.clone(),
        });
        self.persist("room", |store| store.save_room(&RoomRecord::from_descriptor(descriptor)));

        tracing::info!(room_id = %descriptor.room_id, host = ?host, "Joined room");

        if let Some(host) = host.filter(|h| *h != self.local_id) {
            if let Err(e) = self.connect_to_peer(&host, true).await {
                tracing::warn!(room_id = %descriptor.room_id, host = %host, error = %e, "Could not reach host");
                self.leave_room().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Rejoin a room saved in the attached store
    pub async fn join_saved_room(&mut self, room_id: &str, passphrase: &str) -> Result<()> {
        let store = self.store.clone().ok_or(Error::StorageNotInitialized)?;
        let record = store
            .load_room(room_id)?
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;

        self.join_room(&record.to_descriptor(), passphrase).await
    }

    /// Leave the active room
    ///
    /// Closes every link (one `PeerLeft` each), drops the local stream and
    /// forgets the room key. Safe to call at any time.
    pub async fn leave_room(&mut self) {
        let links: Vec<(String, PeerLink)> = self.peers.drain().collect();
        for (peer_id, mut link) in links {
            link.close().await;
            self.emit(SessionEvent::PeerLeft { peer_id });
        }

        self.local_stream = None;

        if let Some(room) = self.room.take() {
            self.encryption.remove_room(&room.id);
            tracing::info!(room_id = %room.id, name = %room.name, "Left room");
        }
    }

    // ========================================================================
    // LINKS & SIGNALING
    // ========================================================================

    /// Open a link to `peer_id`
    ///
    /// No-op if a link already exists. As initiator the offer goes out
    /// through the signaling channel.
    pub async fn connect_to_peer(&mut self, peer_id: &str, as_initiator: bool) -> Result<()> {
        if self.room.is_none() {
            return Err(Error::NotInRoom);
        }
        if peer_id == self.local_id {
            tracing::debug!("Refusing to connect to self");
            return Ok(());
        }
        if self.peers.contains_key(peer_id) {
            return Ok(());
        }

        self.next_link_id += 1;
        let sink = LinkEventSink::new(peer_id, self.next_link_id, self.link_tx.clone());
        let role = if as_initiator { Role::Initiator } else { Role::Responder };

        let mut link = PeerLink::connect(self.transport.as_ref(), peer_id, role, &self.config.link, sink).await?;

        if let Some(stream) = &self.local_stream {
            link.add_local_stream(stream).await;
        }

        if as_initiator {
            let offer = link.create_offer().await?;
            if let Err(e) = self.send_signal(peer_id, Signal::Offer { offer }).await {
                link.close().await;
                return Err(e);
            }
        }

        tracing::info!(peer_id, ?role, link_id = link.link_id(), "Peer link created");
        self.peers.insert(peer_id.to_string(), link);
        self.emit(SessionEvent::PeerJoined {
            peer_id: peer_id.to_string(),
        });
        Ok(())
    }

    /// Ask the host to connect to `peer_id`
    pub async fn introduce_peer(&mut self, peer_id: &str) -> Result<()> {
        let room = self.room.as_ref().ok_or(Error::NotInRoom)?;
        let host = room.host_id.clone().ok_or_else(|| Error::PeerNotFound("host".into()))?;

        if room.is_host {
            return self.connect_to_peer(peer_id, true).await;
        }

        let link = self.peers.get(&host).ok_or(Error::PeerNotFound(host))?;
        link.send_message(&ChatEnvelope::PeerJoined {
            peer_id: peer_id.to_string(),
            from: self.local_id.clone(),
        })
        .await;
        Ok(())
    }

    /// Route an inbound handshake step
    ///
    /// An offer from an unknown peer creates a responder link; anything
    /// else from an unknown peer is dropped, as is everything while no room
    /// is active. An offer from a peer whose link is already past its own
    /// handshake means the remote side started over: the old link is
    /// closed (one `PeerLeft`) and a fresh responder answers.
    pub async fn handle_signal(&mut self, from: &str, signal: Signal) -> Result<()> {
        if self.room.is_none() {
            tracing::debug!(from, kind = signal.kind(), "Signal outside a room dropped");
            return Ok(());
        }
        if from == self.local_id {
            return Ok(());
        }

        if matches!(signal, Signal::Offer { .. }) && self.peers.get(from).is_some_and(offer_restarts_link) {
            if let Some(mut stale) = self.peers.remove(from) {
                tracing::info!(peer_id = from, link_id = stale.link_id(), state = %stale.state(), "Peer restarted, replacing link");
                stale.close().await;
                self.emit(SessionEvent::PeerLeft {
                    peer_id: from.to_string(),
                });
            }
        }

        if !self.peers.contains_key(from) {
            if !matches!(signal, Signal::Offer { .. }) {
                tracing::debug!(from, kind = signal.kind(), "Signal for unknown peer dropped");
                return Ok(());
            }
            self.connect_to_peer(from, false).await?;
        }

        let Some(link) = self.peers.get_mut(from) else {
            return Ok(());
        };

        match signal {
            Signal::Offer { offer } => {
                let answer = link.handle_offer(offer).await?;
                if let Err(e) = self.send_signal(from, Signal::Answer { answer }).await {
                    if let Some(link) = self.peers.get_mut(from) {
                        link.close().await;
                    }
                    return Err(e);
                }
            }
            Signal::Answer { answer } => link.handle_answer(answer).await?,
            Signal::IceCandidate { candidate } => link.handle_ice_candidate(candidate).await,
        }
        Ok(())
    }

    /// Process one event from a link
    ///
    /// Events from a link generation that is no longer current are ignored.
    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        let LinkEvent {
            peer_id,
            link_id,
            payload,
        } = event;

        let Some(link) = self.peers.get_mut(&peer_id).filter(|l| l.link_id() == link_id) else {
            tracing::trace!(peer_id = %peer_id, link_id, "Stale link event ignored");
            return;
        };

        let event = match payload {
            LinkPayload::Transport(event) => {
                link.on_transport_event(event).await;
                return;
            }
            LinkPayload::Peer(event) => event,
        };

        match event {
            PeerEvent::SignalToSend(signal) => {
                if let Err(e) = self.send_signal(&peer_id, signal).await {
                    tracing::warn!(peer_id = %peer_id, error = %e, "Failed to deliver signal");
                }
            }
            PeerEvent::MessageReceived(envelope) => {
                self.handle_peer_channel_message(&peer_id, envelope).await;
            }
            PeerEvent::RemoteStream(stream) => {
                self.emit(SessionEvent::Stream { peer_id, stream });
            }
            PeerEvent::ChannelOpen => {
                tracing::info!(peer_id = %peer_id, "Peer connected");
                self.emit(SessionEvent::PeerConnected { peer_id });
            }
            PeerEvent::Closed => {
                self.peers.remove(&peer_id);
                tracing::info!(peer_id = %peer_id, "Peer left");
                self.emit(SessionEvent::PeerLeft { peer_id });
            }
        }
    }

    /// Apply the relay rules to a frame from `from`
    pub async fn handle_peer_channel_message(&mut self, from: &str, envelope: ChatEnvelope) {
        let Some(room) = self.room.clone() else {
            tracing::debug!(from, "Frame outside a room dropped");
            return;
        };

        match envelope {
            ChatEnvelope::Chat { ref encrypted, .. } => {
                let message = match self.encryption.decrypt_message(&room.id, encrypted) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(from, room_id = %room.id, error = %e, "Dropping undecryptable message");
                        return;
                    }
                };

                self.record(&message);

                if room.is_host && !message.is_dm() {
                    let forwarded = self.broadcast(&envelope, Some(from)).await;
                    tracing::debug!(from, forwarded, "Relayed message");
                }

                self.emit(SessionEvent::Message {
                    from: from.to_string(),
                    message,
                });
            }
            ChatEnvelope::Signal { from: origin, signal } => {
                if let Err(e) = self.handle_signal(&origin, signal).await {
                    tracing::warn!(from = %origin, error = %e, "Tunnelled signal failed");
                }
            }
            ChatEnvelope::PeerJoined { peer_id, .. } => {
                if !room.is_host || peer_id == self.local_id || self.peers.contains_key(&peer_id) {
                    return;
                }
                if let Err(e) = self.connect_to_peer(&peer_id, true).await {
                    tracing::warn!(peer_id = %peer_id, error = %e, "Failed to connect announced peer");
                }
            }
        }
    }

    // ========================================================================
    // MESSAGING
    // ========================================================================

    /// Encrypt and send a room message to every link
    pub async fn send_message(&mut self, text: &str, username: &str) -> Result<Message> {
        let room_id = self.room.as_ref().ok_or(Error::NotInRoom)?.id.clone();

        let message = Message::new(text, username, self.local_id.as_str(), false);
        let envelope = ChatEnvelope::Chat {
            encrypted: self.encryption.encrypt_message(&room_id, &message)?,
            from: self.local_id.clone(),
        };

        let sent = self.broadcast(&envelope, None).await;
        tracing::debug!(room_id = %room_id, sent, "Message sent");

        self.record(&message);
        Ok(message)
    }

    /// Encrypt and send a direct message over the link to `peer_id` only
    pub async fn send_dm(&mut self, peer_id: &str, text: &str, username: &str) -> Result<Message> {
        let room_id = self.room.as_ref().ok_or(Error::NotInRoom)?.id.clone();
        let link = self
            .peers
            .get(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))?;

        let message = Message::new(text, username, self.local_id.as_str(), true);
        let envelope = ChatEnvelope::Chat {
            encrypted: self.encryption.encrypt_message(&room_id, &message)?,
            from: self.local_id.clone(),
        };

        if !link.send_message(&envelope).await {
            tracing::warn!(peer_id, "DM not delivered, link not open");
        }

        let conversation = dm_conversation_id(&self.local_id, peer_id);
        self.persist("dm", |store| store.save_dm(&conversation, &message));
        Ok(message)
    }

    /// Saved history of the active room, oldest first
    pub fn room_history(&self) -> Result<Vec<Message>> {
        let room = self.room.as_ref().ok_or(Error::NotInRoom)?;
        let store = self.store.as_ref().ok_or(Error::StorageNotInitialized)?;
        store.load_messages(&room.id, self.config.history_limit)
    }

    /// Saved direct messages with `peer_id`, oldest first
    pub fn dm_history(&self, peer_id: &str) -> Result<Vec<Message>> {
        let store = self.store.as_ref().ok_or(Error::StorageNotInitialized)?;
        store.load_dms(&dm_conversation_id(&self.local_id, peer_id))
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    /// Share `stream` on every link; links created later inherit it
    pub async fn enable_video(&mut self, stream: MediaStream) {
        self.disable_video().await;

        for link in self.peers.values() {
            link.add_local_stream(&stream).await;
        }
        tracing::info!(stream_id = %stream.id, links = self.peers.len(), "Local video enabled");
        self.local_stream = Some(stream);
    }

    /// Stop sharing the local stream
    pub async fn disable_video(&mut self) {
        let Some(stream) = self.local_stream.take() else {
            return;
        };
        for link in self.peers.values() {
            link.remove_local_stream(&stream.id).await;
        }
        tracing::info!(stream_id = %stream.id, "Local video disabled");
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Linked peers plus self
    pub fn peer_count(&self) -> usize {
        self.peers.len() + 1
    }

    /// Ids of linked peers, sorted
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether this participant hosts the active room
    pub fn is_host(&self) -> bool {
        self.room.as_ref().map(|r| r.is_host).unwrap_or(false)
    }

    /// Id of the active room
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|r| r.id.as_str())
    }

    /// This participant's id
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Fingerprint of the active room key
    pub fn key_fingerprint(&self) -> Option<String> {
        self.room
            .as_ref()
            .and_then(|r| self.encryption.fingerprint(&r.id))
    }

    /// The link to `peer_id`, if any
    pub fn peer(&self, peer_id: &str) -> Option<&PeerLink> {
        self.peers.get(peer_id)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn ensure_no_room(&self) -> Result<()> {
        match &self.room {
            Some(room) => Err(Error::AlreadyInRoom(room.id.clone())),
            None => Ok(()),
        }
    }

    async fn send_signal(&self, to: &str, signal: Signal) -> Result<()> {
        tracing::trace!(to, kind = signal.kind(), "Sending signal");
        self.signaling
            .send_to_peer(
                to,
                SignalEnvelope {
                    from: self.local_id.clone(),
                    signal,
                },
            )
            .await
    }

    /// Send to every link except `except`; returns how many accepted it
    async fn broadcast(&self, envelope: &ChatEnvelope, except: Option<&str>) -> usize {
        let sends = self
            .peers
            .iter()
            .filter(|(peer_id, _)| Some(peer_id.as_str()) != except)
            .map(|(_, link)| link.send_message(envelope));

        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    /// Save a delivered or sent message to history
    fn record(&self, message: &Message) {
        if message.is_dm() {
            let conversation = dm_conversation_id(&self.local_id, message.user_id());
            self.persist("dm", |store| store.save_dm(&conversation, message));
        } else if let Some(room) = &self.room {
            self.persist("message", |store| store.save_message(&room.id, message));
        }
    }

    /// Run a store write; failures are logged, never surfaced
    fn persist<F>(&self, what: &'static str, write: F)
    where
        F: FnOnce(&dyn Persistence) -> Result<()>,
    {
        if let Some(store) = &self.store {
            if let Err(e) = write(store.as_ref()) {
                tracing::warn!(what, error = %e, "Failed to persist");
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Whether an incoming offer can only be answered by a new link
///
/// A responder takes exactly one offer, and an initiator still waiting
/// for its answer is in offer glare rather than a restart.
fn offer_restarts_link(link: &PeerLink) -> bool {
    !matches!(
        (link.role(), link.state()),
        (Role::Responder, ConnectionState::Idle)
            | (
                Role::Initiator,
                ConnectionState::Idle | ConnectionState::OfferCreated | ConnectionState::AwaitingAnswer
            )
    )
}

// ============================================================================
// TESTS
// ============================================================================
