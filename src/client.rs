//! Coordinator: the single task that owns every component
//!
//! Operator commands, control channel events, voice capture events, media
//! session events and the joystick tick all arrive here and are handled one
//! at a time. Components never call each other; they push actions that the
//! coordinator executes after each event.

use crate::channel::{ChannelEvent, ControlChannel};
use crate::config::ClientConfig;
use crate::joystick::{Direction, InputSampler};
use crate::media::{
    run_open, run_teardown, MediaAction, MediaEvent, MediaSessionManager, PeerConnector,
    Signaling, VideoQuality, RESTART_DELAY,
};
use crate::protocol::{Axis, ControlMessage};
use crate::ui::UiPort;
use crate::voice::{MicrophoneProvider, VoiceAction, VoiceCapture, VoiceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Operator input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GestureStart(Axis),
    GestureMove { axis: Axis, angle: f64, distance: f64 },
    GestureEnd(Axis),
    VoicePress,
    VoiceRelease,
    SendText(String),
    /// Prebuilt `control` message (drive, camera, voice settings)
    Control(ControlMessage),
    SetVideoQuality(VideoQuality),
    RestartVideo,
    Shutdown,
}

/// Peer backend plus the signaling endpoint it negotiates through
#[derive(Clone)]
pub struct MediaBackend {
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn Signaling>,
}

pub struct Coordinator<U: UiPort> {
    channel: ControlChannel,
    sampler: InputSampler,
    voice: VoiceCapture,
    media: MediaSessionManager,
    microphones: Arc<dyn MicrophoneProvider>,
    media_backend: Option<MediaBackend>,
    ui: U,
    tick: Duration,
    restart_delay: Duration,
    voice_tx: UnboundedSender<VoiceEvent>,
    voice_rx: UnboundedReceiver<VoiceEvent>,
    media_tx: UnboundedSender<MediaEvent>,
    media_rx: UnboundedReceiver<MediaEvent>,
}

impl<U: UiPort> Coordinator<U> {
    pub fn new(
        config: &ClientConfig,
        channel: ControlChannel,
        microphones: Arc<dyn MicrophoneProvider>,
        media_backend: Option<MediaBackend>,
        ui: U,
    ) -> Self {
        let (voice_tx, voice_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let voice = VoiceCapture::new(microphones.is_supported(), voice_tx.clone());
        let media = MediaSessionManager::new(config.video_quality, media_backend.is_some());

        let mut coordinator = Self {
            channel,
            sampler: InputSampler::new(config.joystick_radius),
            voice,
            media,
            microphones,
            media_backend,
            ui,
            tick: config.tick,
            restart_delay: RESTART_DELAY,
            voice_tx,
            voice_rx,
            media_tx,
            media_rx,
        };
        coordinator.apply_voice_actions();
        coordinator
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn media(&self) -> &MediaSessionManager {
        &self.media
    }

    pub fn voice(&self) -> &VoiceCapture {
        &self.voice
    }

    fn send(&self, msg: ControlMessage) {
        if let Err(e) = self.channel.send(msg) {
            warn!("Dropping outbound message: {}", e);
        }
    }

    /// Kick off the video session. Needs a runtime for the spawned open.
    pub fn start_media(&mut self) {
        self.media.start();
        self.apply_media_actions();
    }

    /// Returns false on shutdown.
    pub fn handle_command(&mut self, cmd: Command) -> bool {
        debug!("Command: {:?}", cmd);
        match cmd {
            Command::GestureStart(axis) => self.sampler.on_gesture_start(axis),
            Command::GestureMove {
                axis,
                angle,
                distance,
            } => {
                let vector = self.sampler.on_gesture_move(axis, angle, distance);
                if axis == Axis::Movement {
                    self.ui
                        .movement_changed(vector.direction(), vector.speed_percent());
                }
            }
            Command::GestureEnd(axis) => {
                let zero = self.sampler.on_gesture_end(axis);
                self.send(zero);
                if axis == Axis::Movement {
                    self.ui.movement_changed(Direction::Stop, 0);
                }
            }
            Command::VoicePress => {
                self.voice.press();
                self.apply_voice_actions();
            }
            Command::VoiceRelease => {
                self.voice.release();
                self.apply_voice_actions();
            }
            Command::SendText(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return true;
                }
                self.ui.user_text(&text);
                self.send(ControlMessage::text(text));
            }
            Command::Control(msg) => self.send(msg),
            Command::SetVideoQuality(quality) => self.media.set_quality(quality),
            Command::RestartVideo => {
                self.media.restart();
                self.apply_media_actions();
            }
            Command::Shutdown => return false,
        }
        true
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.ui.connection_changed(true),
            ChannelEvent::Disconnected => self.ui.connection_changed(false),
            ChannelEvent::Inbound(event) => self.ui.inbound(&event),
        }
    }

    pub fn handle_voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Access(result) => self.voice.on_access(result),
            VoiceEvent::Capture { session, event } => self.voice.on_capture(session, event),
        }
        self.apply_voice_actions();
    }

    pub fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Opened { generation, result } => self.media.on_opened(generation, result),
            MediaEvent::Negotiated { generation, result } => {
                self.media.on_negotiated(generation, result)
            }
            MediaEvent::Peer { generation, event } => self.media.on_peer_event(generation, event),
            MediaEvent::TeardownComplete { generation } => {
                self.media.on_teardown_complete(generation)
            }
        }
        self.apply_media_actions();
    }

    pub fn on_tick(&mut self) {
        for msg in self.sampler.tick() {
            self.send(msg);
        }
    }

    fn apply_voice_actions(&mut self) {
        for action in self.voice.drain_actions() {
            match action {
                VoiceAction::RequestAccess => {
                    let microphones = self.microphones.clone();
                    let tx = self.voice_tx.clone();
                    tokio::spawn(async move {
                        let result = microphones.request_access().await;
                        let _ = tx.send(VoiceEvent::Access(result));
                    });
                }
                VoiceAction::Send(msg) => self.send(msg),
                VoiceAction::Status(status) => self.ui.voice_changed(status),
            }
        }
    }

    fn apply_media_actions(&mut self) {
        for action in self.media.drain_actions() {
            match action {
                MediaAction::Open { generation, config } => match &self.media_backend {
                    Some(backend) => {
                        tokio::spawn(run_open(
                            backend.connector.clone(),
                            backend.signaling.clone(),
                            generation,
                            config,
                            self.media_tx.clone(),
                        ));
                    }
                    None => warn!("Video open requested without a peer backend"),
                },
                MediaAction::Teardown { session, reopen } => {
                    tokio::spawn(run_teardown(
                        session,
                        reopen,
                        self.restart_delay,
                        self.media_tx.clone(),
                    ));
                }
                MediaAction::State { state, resolution } => {
                    self.ui.media_changed(state, resolution)
                }
                MediaAction::Unsupported => self.ui.video_unsupported(),
            }
        }
    }

    /// Close the video session and wait for the close to finish.
    async fn shutdown(&mut self) {
        info!("Shutting down");
        self.voice.close();
        self.media.close();
        for action in self.media.drain_actions() {
            match action {
                MediaAction::Teardown { session, .. } => {
                    run_teardown(session, None, Duration::ZERO, self.media_tx.clone()).await
                }
                MediaAction::State { state, resolution } => {
                    self.ui.media_changed(state, resolution)
                }
                other => debug!("Ignoring {:?} during shutdown", other),
            }
        }
    }

    /// Run until a `Shutdown` command arrives or the command source closes.
    pub async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut channel_events: UnboundedReceiver<ChannelEvent>,
    ) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.start_media();
        info!("Coordinator started (tick {:?})", self.tick);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = channel_events.recv() => self.handle_channel_event(event),
                Some(event) = self.voice_rx.recv() => self.handle_voice_event(event),
                Some(event) = self.media_rx.recv() => self.handle_media_event(event),
                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.shutdown().await;
    }
}
