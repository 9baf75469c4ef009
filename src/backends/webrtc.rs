//! webrtc-rs peer backend: one receive-only video transceiver per session

use crate::media::{
    Connectivity, MediaError, PeerConnector, PeerEvent, PeerSession, PeerSink, RemoteTrack,
    SessionDescription, VideoConfig,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

fn backend(e: webrtc::Error) -> MediaError {
    MediaError::Backend(e.to_string())
}

fn negotiation(e: webrtc::Error) -> MediaError {
    MediaError::Negotiation(e.to_string())
}

impl From<RTCPeerConnectionState> for Connectivity {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Connectivity::Connecting,
            RTCPeerConnectionState::Connected => Connectivity::Connected,
            RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
            RTCPeerConnectionState::Failed => Connectivity::Failed,
            RTCPeerConnectionState::Closed => Connectivity::Closed,
            _ => Connectivity::New,
        }
    }
}

pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

impl Default for WebRtcConnector {
    fn default() -> Self {
        Self::new(vec!["stun:stun.l.google.com:19302".to_string()])
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(
        &self,
        config: &VideoConfig,
        sink: PeerSink,
    ) -> Result<Arc<dyn PeerSession>, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(backend)?);

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(backend)?;

        let state_sink = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            state_sink.post(PeerEvent::Connectivity(state.into()));
            Box::pin(async {})
        }));

        let track_sink = sink.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            if track.kind() == RTPCodecType::Video {
                track_sink.post(PeerEvent::Track(RemoteTrack { id: track.id() }));
            }
            Box::pin(async {})
        }));

        let candidate_sink = sink.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                candidate_sink.post(PeerEvent::Candidate(c.to_string()));
            }
            Box::pin(async {})
        }));

        info!(
            "Peer session {} created for {} video",
            sink.generation(),
            config
        );
        Ok(Arc::new(WebRtcSession { pc }))
    }
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        let desc = RTCSessionDescription::offer(offer.sdp).map_err(negotiation)?;
        // candidates are not trickled, so the offer must carry them
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await.map_err(negotiation)?;
        let _ = gathered.recv().await;
        debug!("ICE gathering complete");

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| MediaError::Negotiation("no local description".to_string()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<(), MediaError> {
        let desc = RTCSessionDescription::answer(answer.sdp).map_err(negotiation)?;
        self.pc.set_remote_description(desc).await.map_err(negotiation)
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await.map_err(backend)
    }
}
