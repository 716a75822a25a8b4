//! # WebRTC Transport
//!
//! [`Transport`] backed by the `webrtc` crate, interoperable with browser
//! `RTCPeerConnection`s speaking the same JSON frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WebRTC Transport                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  RTCPeerConnection                                          │
//! │       │                                                     │
//! │       ├── Data Channel "chat" (ordered, text frames)        │
//! │       │     on_open / on_close / on_message ──► sink       │
//! │       │                                                     │
//! │       ├── ICE candidates (STUN/TURN) ──► sink              │
//! │       │                                                     │
//! │       └── Media tracks                                      │
//! │             add_track / remove_track, on_track ──► sink     │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local tracks are negotiated here; feeding them samples belongs to the
//! capture pipeline that produced the [`MediaStream`].

#![cfg(feature = "webrtc")]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::events::LinkEventSink;
use super::protocol::{IceCandidate, SdpType, SessionDescription};
use super::transport::{
    IceServer, LinkConfig, MediaStream, MediaTrack, TrackKind, Transport, TransportEvent,
    TransportLink, TransportState,
};
use crate::error::{Error, Result};

/// Creates `RTCPeerConnection`-backed links
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransport;

impl WebRtcTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_link(
        &self,
        peer_id: &str,
        config: &LinkConfig,
        sink: LinkEventSink,
    ) -> Result<Box<dyn TransportLink>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport_err)?;
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(transport_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: config.ice_servers.iter().map(rtc_ice_server).collect(),
                ..Default::default()
            })
            .await
            .map_err(transport_err)?,
        );

        let channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));
        install_callbacks(&pc, &sink, &channel);

        tracing::debug!(peer_id, "Created WebRTC peer connection");
        Ok(Box::new(WebRtcLink {
            pc,
            sink,
            channel,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    sink: LinkEventSink,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    senders: Mutex<HashMap<String, Vec<Arc<RTCRtpSender>>>>,
}

fn install_callbacks(
    pc: &Arc<RTCPeerConnection>,
    sink: &LinkEventSink,
    channel: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
) {
    let ice_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = ice_sink.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => sink.transport(TransportEvent::IceCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                })),
                Err(e) => tracing::warn!(error = %e, "Failed to encode local ICE candidate"),
            }
        })
    }));

    let state_sink = sink.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = state_sink.clone();
        Box::pin(async move {
            let mapped = match state {
                RTCPeerConnectionState::Connecting => TransportState::Connecting,
                RTCPeerConnectionState::Connected => TransportState::Connected,
                RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                RTCPeerConnectionState::Failed => TransportState::Failed,
                RTCPeerConnectionState::Closed => TransportState::Closed,
                _ => return,
            };
            sink.transport(TransportEvent::ConnectionState(mapped));
        })
    }));

    // Responder side: the initiator's channel arrives here
    let dc_sink = sink.clone();
    let dc_slot = channel.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let sink = dc_sink.clone();
        let slot = dc_slot.clone();
        Box::pin(async move {
            tracing::debug!(label = dc.label(), "Remote data channel announced");
            wire_data_channel(&dc, &sink);
            *slot.lock() = Some(dc);
        })
    }));

    // on_track fires per track; report the whole stream each time
    let track_sink = sink.clone();
    let remote_streams = Arc::new(Mutex::new(RemoteStreams::default()));
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = track_sink.clone();
            let streams = remote_streams.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let merged = streams.lock().add_track(&track.stream_id(), MediaTrack { id: track.id(), kind });
                sink.transport(TransportEvent::RemoteStream(merged));
            })
        },
    ));
}

/// Remote tracks grouped by the stream they belong to
#[derive(Default)]
struct RemoteStreams {
    streams: HashMap<String, MediaStream>,
}

impl RemoteStreams {
    /// Record `track` and return its stream with every track seen so far
    fn add_track(&mut self, stream_id: &str, track: MediaTrack) -> MediaStream {
        let stream = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| MediaStream {
                id: stream_id.to_string(),
                tracks: Vec::new(),
            });
        if !stream.tracks.iter().any(|t| t.id == track.id) {
            stream.tracks.push(track);
        }
        stream.clone()
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, sink: &LinkEventSink) {
    let open_sink = sink.clone();
    dc.on_open(Box::new(move || {
        let sink = open_sink.clone();
        Box::pin(async move { sink.transport(TransportEvent::DataChannelOpen) })
    }));

    let close_sink = sink.clone();
    dc.on_close(Box::new(move || {
        let sink = close_sink.clone();
        Box::pin(async move { sink.transport(TransportEvent::DataChannelClosed) })
    }));

    let message_sink = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = message_sink.clone();
        Box::pin(async move { sink.transport(TransportEvent::DataChannelMessage(msg.data)) })
    }));
}

impl WebRtcLink {
    fn data_channel(&self) -> Result<Arc<RTCDataChannel>> {
        self.channel
            .lock()
            .clone()
            .ok_or_else(|| Error::TransportFailure("no data channel".into()))
    }

    async fn describe(&self, sdp_type: SdpType) -> Result<SessionDescription> {
        let description = match sdp_type {
            SdpType::Offer => self.pc.create_offer(None).await,
            SdpType::Answer => self.pc.create_answer(None).await,
        }
        .map_err(signaling_err)?;

        let sdp = description.sdp.clone();
        self.pc
            .set_local_description(description)
            .await
            .map_err(signaling_err)?;

        Ok(match sdp_type {
            SdpType::Offer => SessionDescription::offer(sdp),
            SdpType::Answer => SessionDescription::answer(sdp),
        })
    }
}

#[async_trait]
impl TransportLink for WebRtcLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.describe(SdpType::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.describe(SdpType::Answer).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(signaling_err)?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(signaling_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(signaling_err)
    }

    async fn create_data_channel(&self, label: &str, ordered: bool) -> Result<()> {
        let dc = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(ordered),
                    ..Default::default()
                }),
            )
            .await
            .map_err(transport_err)?;

        wire_data_channel(&dc, &self.sink);
        *self.channel.lock() = Some(dc);
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let dc = self.data_channel()?;

        // Browsers JSON.parse the frame, so send text
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        dc.send_text(text).await.map_err(transport_err)?;
        Ok(())
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        let mut added = Vec::with_capacity(stream.tracks.len());

        for track in &stream.tracks {
            let mime_type = match track.kind {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id.clone(),
                stream.id.clone(),
            ));

            let sender = self
                .pc
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(transport_err)?;
            added.push(sender);
        }

        self.senders
            .lock()
            .entry(stream.id.clone())
            .or_default()
            .extend(added);
        Ok(())
    }

    async fn remove_local_stream(&self, stream_id: &str) -> Result<()> {
        let senders = self.senders.lock().remove(stream_id).unwrap_or_default();
        for sender in senders {
            self.pc.remove_track(&sender).await.map_err(transport_err)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let dc = self.channel.lock().take();
        if let Some(dc) = dc {
            let _ = dc.close().await;
        }
        self.pc.close().await.map_err(transport_err)
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn transport_err(e: webrtc::Error) -> Error {
    Error::TransportFailure(e.to_string())
}

fn signaling_err(e: webrtc::Error) -> Error {
    Error::SignalingError(e.to_string())
}
