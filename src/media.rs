//! Video session lifecycle
//!
//! [`MediaSessionManager`] owns at most one peer session at a time. Opening,
//! negotiating and closing sessions are async and run as tasks spawned by the
//! coordinator; their completions come back as [`MediaEvent`]s tagged with a
//! generation number so that anything from a replaced session is dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Wait between tearing a failed session down and building the next one
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("video sessions are not available")]
    UnsupportedCapability,
    #[error("signaling failed: {0}")]
    Signaling(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("peer backend error: {0}")]
    Backend(String),
}

/// Requested frame size for the remote camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for VideoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl VideoQuality {
    pub fn config(&self) -> VideoConfig {
        match self {
            Self::Low => VideoConfig { width: 320, height: 240 },
            Self::Medium => VideoConfig { width: 640, height: 480 },
            Self::High => VideoConfig { width: 1280, height: 720 },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown video quality '{0}' (expected low, medium or high)")]
pub struct UnknownQuality(pub String);

impl FromStr for VideoQuality {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(UnknownQuality(s.to_string())),
        }
    }
}

/// SDP blob as exchanged with the signaling endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl Connectivity {
    /// States that mean the link is gone and a fresh session is needed
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
}

/// Callbacks from the underlying peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Connectivity(Connectivity),
    Track(RemoteTrack),
    /// Local ICE candidate; only logged
    Candidate(String),
}

pub enum MediaEvent {
    Opened {
        generation: u64,
        result: Result<Arc<dyn PeerSession>, MediaError>,
    },
    Negotiated {
        generation: u64,
        result: Result<(), MediaError>,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    TeardownComplete {
        generation: u64,
    },
}

impl fmt::Debug for MediaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { generation, result } => f
                .debug_struct("Opened")
                .field("generation", generation)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Negotiated { generation, result } => f
                .debug_struct("Negotiated")
                .field("generation", generation)
                .field("result", result)
                .finish(),
            Self::Peer { generation, event } => f
                .debug_struct("Peer")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Self::TeardownComplete { generation } => f
                .debug_struct("TeardownComplete")
                .field("generation", generation)
                .finish(),
        }
    }
}

/// Handed to a peer backend so its callbacks reach the coordinator
#[derive(Debug, Clone)]
pub struct PeerSink {
    generation: u64,
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl PeerSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn post(&self, event: PeerEvent) {
        let _ = self.tx.send(MediaEvent::Peer {
            generation: self.generation,
            event,
        });
    }
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    /// Apply the offer locally. Returns the description to hand to signaling,
    /// which may differ from `offer` once candidates are gathered.
    async fn set_local_description(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<(), MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(
        &self,
        config: &VideoConfig,
        sink: PeerSink,
    ) -> Result<Arc<dyn PeerSession>, MediaError>;
}

/// One-shot offer/answer exchange
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn exchange(&self, offer: &SessionDescription) -> Result<SessionDescription, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Uninitialized,
    Negotiating,
    Connected,
    Recovering,
    Closed,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Recovering => "recovering",
            Self::Closed => "closed",
        }
    }
}

pub enum MediaAction {
    /// Spawn [`run_open`] for this generation
    Open { generation: u64, config: VideoConfig },
    /// Close `session` (if any); when `reopen` is set, wait the restart delay
    /// and post `TeardownComplete` for that generation
    Teardown {
        session: Option<Arc<dyn PeerSession>>,
        reopen: Option<u64>,
    },
    State {
        state: MediaState,
        resolution: Option<VideoConfig>,
    },
    Unsupported,
}

impl fmt::Debug for MediaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { generation, config } => write!(f, "Open({}, {})", generation, config),
            Self::Teardown { session, reopen } => write!(
                f,
                "Teardown(session: {}, reopen: {:?})",
                session.is_some(),
                reopen
            ),
            Self::State { state, resolution } => write!(f, "State({:?}, {:?})", state, resolution),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

pub struct MediaSessionManager {
    state: MediaState,
    supported: bool,
    /// Consulted the next time a session is built
    config: VideoConfig,
    /// Frame size of the session currently open or being opened
    active_config: Option<VideoConfig>,
    generation: u64,
    session: Option<Arc<dyn PeerSession>>,
    track: Option<RemoteTrack>,
    open_in_flight: bool,
    actions: Vec<MediaAction>,
}

impl MediaSessionManager {
    pub fn new(quality: VideoQuality, supported: bool) -> Self {
        Self {
            state: MediaState::Uninitialized,
            supported,
            config: quality.config(),
            active_config: None,
            generation: 0,
            session: None,
            track: None,
            open_in_flight: false,
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn config(&self) -> VideoConfig {
        self.config
    }

    pub fn active_config(&self) -> Option<VideoConfig> {
        self.active_config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn track(&self) -> Option<&RemoteTrack> {
        self.track.as_ref()
    }

    fn set_state(&mut self, state: MediaState) {
        if self.state != state {
            info!("Video session {} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        let resolution = match state {
            MediaState::Negotiating | MediaState::Connected => self.active_config,
            _ => None,
        };
        self.actions.push(MediaAction::State { state, resolution });
    }

    fn open(&mut self) {
        self.generation += 1;
        self.active_config = Some(self.config);
        self.open_in_flight = true;
        self.set_state(MediaState::Negotiating);
        self.actions.push(MediaAction::Open {
            generation: self.generation,
            config: self.config,
        });
    }

    pub fn start(&mut self) {
        if !self.supported {
            warn!("No peer backend available, video disabled");
            self.actions.push(MediaAction::Unsupported);
            return;
        }
        if self.state != MediaState::Uninitialized {
            debug!("Video start ignored in {}", self.state.as_str());
            return;
        }
        self.open();
    }

    pub fn on_opened(&mut self, generation: u64, result: Result<Arc<dyn PeerSession>, MediaError>) {
        let current = generation == self.generation && self.state == MediaState::Negotiating;
        match result {
            Ok(session) if current => {
                debug!("Peer session {} opened", generation);
                self.session = Some(session);
            }
            Ok(session) => {
                debug!("Closing peer session {} opened after it was replaced", generation);
                self.actions.push(MediaAction::Teardown {
                    session: Some(session),
                    reopen: None,
                });
            }
            Err(e) if current => {
                warn!("Could not open peer session: {}", e);
                self.open_in_flight = false;
            }
            Err(e) => debug!("Stale open failure for session {}: {}", generation, e),
        }
    }

    pub fn on_negotiated(&mut self, generation: u64, result: Result<(), MediaError>) {
        if generation != self.generation {
            debug!("Stale negotiation result for session {}", generation);
            return;
        }
        self.open_in_flight = false;
        match result {
            Ok(()) => debug!("Session {} negotiated, waiting for connectivity", generation),
            // negotiation failures stall here until something calls restart
            Err(e) => warn!("Video negotiation failed: {}", e),
        }
    }

    pub fn on_peer_event(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.generation {
            debug!("Dropping {:?} from stale session {}", event, generation);
            return;
        }
        match event {
            PeerEvent::Candidate(candidate) => debug!("Local ICE candidate: {}", candidate),
            PeerEvent::Track(track) => {
                info!("Remote video track {} attached", track.id);
                self.track = Some(track);
            }
            PeerEvent::Connectivity(c) => {
                debug!("Peer connectivity {:?}", c);
                if self.session.is_none() {
                    debug!("Connectivity before session handle, ignored");
                    return;
                }
                match (self.state, c) {
                    (MediaState::Negotiating, Connectivity::Connected) => {
                        self.set_state(MediaState::Connected)
                    }
                    (MediaState::Negotiating | MediaState::Connected, c) if c.is_lost() => {
                        warn!("Video connection {:?}, restarting", c);
                        self.trigger_restart();
                    }
                    _ => {}
                }
            }
        }
    }

    fn trigger_restart(&mut self) {
        self.track = None;
        self.set_state(MediaState::Recovering);
        self.actions.push(MediaAction::Teardown {
            session: self.session.take(),
            reopen: Some(self.generation),
        });
    }

    pub fn on_teardown_complete(&mut self, generation: u64) {
        if self.state != MediaState::Recovering || generation != self.generation {
            debug!("Ignoring teardown completion for session {}", generation);
            return;
        }
        self.open();
    }

    /// Manual restart: tear down and renegotiate with the current config.
    pub fn restart(&mut self) {
        match self.state {
            MediaState::Uninitialized => self.start(),
            MediaState::Recovering | MediaState::Closed => {
                debug!("Video restart ignored in {}", self.state.as_str())
            }
            MediaState::Negotiating if self.open_in_flight => {
                debug!("Video restart ignored, negotiation in flight")
            }
            MediaState::Negotiating | MediaState::Connected => {
                info!("Restarting video session");
                self.trigger_restart();
            }
        }
    }

    /// Takes effect on the next session only.
    pub fn set_quality(&mut self, quality: VideoQuality) {
        self.config = quality.config();
        info!(
            "Video quality set to {} ({}), applies on next restart",
            quality.as_str(),
            self.config
        );
    }

    pub fn close(&mut self) {
        if self.state == MediaState::Closed {
            return;
        }
        self.generation += 1;
        self.open_in_flight = false;
        self.track = None;
        self.set_state(MediaState::Closed);
        self.actions.push(MediaAction::Teardown {
            session: self.session.take(),
            reopen: None,
        });
    }

    pub fn drain_actions(&mut self) -> Vec<MediaAction> {
        std::mem::take(&mut self.actions)
    }
}

/// Offer, local description, signaling round trip, remote description.
pub async fn negotiate(session: &dyn PeerSession, signaling: &dyn Signaling) -> Result<(), MediaError> {
    let offer = session.create_offer().await?;
    let local = session.set_local_description(offer).await?;
    let answer = signaling.exchange(&local).await?;
    session.set_remote_description(answer).await
}

/// Build a session for `generation` and negotiate it, posting both steps.
pub async fn run_open(
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn Signaling>,
    generation: u64,
    config: VideoConfig,
    tx: mpsc::UnboundedSender<MediaEvent>,
) {
    let sink = PeerSink::new(generation, tx.clone());
    let session = match connector.open(&config, sink).await {
        Ok(session) => session,
        Err(e) => {
            let _ = tx.send(MediaEvent::Opened {
                generation,
                result: Err(e),
            });
            return;
        }
    };
    let _ = tx.send(MediaEvent::Opened {
        generation,
        result: Ok(session.clone()),
    });
    let result = negotiate(session.as_ref(), signaling.as_ref()).await;
    let _ = tx.send(MediaEvent::Negotiated { generation, result });
}

/// Close the session and, for restarts, report back after `delay`.
pub async fn run_teardown(
    session: Option<Arc<dyn PeerSession>>,
    reopen: Option<u64>,
    delay: Duration,
    tx: mpsc::UnboundedSender<MediaEvent>,
) {
    if let Some(session) = session {
        if let Err(e) = session.close().await {
            warn!("Error closing peer session: {}", e);
        }
    }
    if let Some(generation) = reopen {
        tokio::time::sleep(delay).await;
        let _ = tx.send(MediaEvent::TeardownComplete { generation });
    }
}
