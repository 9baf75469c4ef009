//! UI projection
//!
//! The coordinator never touches presentation directly. It reports through
//! [`UiPort`], and [`UiProjection`] folds those reports into a shared
//! [`UiState`] that a front end (the console renderer in `main`) reads.

use crate::joystick::Direction;
use crate::media::{MediaState, VideoConfig};
use crate::protocol::InboundEvent;
use crate::voice::VoiceStatus;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Transcript entries kept before the oldest are evicted
pub const MAX_CHAT_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Assistant => "Robot",
        }
    }
}

/// Chat transcript entry
#[derive(Clone, Debug)]
pub struct ChatEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: Instant,
}

impl ChatEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Instant::now(),
        }
    }
}

/// Drive HUD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hud {
    pub direction: Direction,
    pub speed_percent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStatus {
    Off,
    Connecting,
    Live,
    Recovering,
    Closed,
    Unsupported,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Recovering => "recovering",
            Self::Closed => "closed",
            Self::Unsupported => "unsupported",
        }
    }
}

impl From<MediaState> for VideoStatus {
    fn from(state: MediaState) -> Self {
        match state {
            MediaState::Uninitialized => Self::Off,
            MediaState::Negotiating => Self::Connecting,
            MediaState::Connected => Self::Live,
            MediaState::Recovering => Self::Recovering,
            MediaState::Closed => Self::Closed,
        }
    }
}

/// Everything the coordinator may change on screen
pub trait UiPort: Send {
    fn connection_changed(&mut self, connected: bool);
    fn inbound(&mut self, event: &InboundEvent);
    /// Local HUD update from the movement joystick
    fn movement_changed(&mut self, direction: Direction, speed_percent: u32);
    fn voice_changed(&mut self, status: VoiceStatus);
    fn media_changed(&mut self, state: MediaState, resolution: Option<VideoConfig>);
    fn video_unsupported(&mut self);
    /// Operator typed a chat line
    fn user_text(&mut self, text: &str);
}

pub struct UiState {
    /// Control channel indicator
    pub connected: bool,
    /// Free-text status from the remote side
    pub status_line: String,
    pub hud: Hud,
    /// Conversation history, oldest first
    pub chat: VecDeque<ChatEntry>,
    pub voice: VoiceStatus,
    pub video: VideoStatus,
    pub resolution: Option<VideoConfig>,
    /// Bumped on every change so renderers can skip unchanged frames
    pub revision: u64,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            connected: false,
            status_line: "Connecting...".to_string(),
            hud: Hud::default(),
            chat: VecDeque::with_capacity(MAX_CHAT_ENTRIES),
            voice: VoiceStatus::Ready,
            video: VideoStatus::Off,
            resolution: None,
            revision: 0,
        }
    }
}

impl UiState {
    pub fn push_chat(&mut self, entry: ChatEntry) {
        if self.chat.len() == MAX_CHAT_ENTRIES {
            self.chat.pop_front();
        }
        self.chat.push_back(entry);
    }
}

/// Chat entries produced by a successful reply, in display order.
pub fn reply_entries(event: &InboundEvent) -> SmallVec<[ChatEntry; 2]> {
    let mut entries = SmallVec::new();
    match event {
        InboundEvent::VoiceResponse(resp) if resp.is_ok() => {
            if let Some(reply) = &resp.result {
                if let Some(heard) = reply.transcription.as_deref().filter(|t| !t.is_empty()) {
                    entries.push(ChatEntry::new(Speaker::User, heard));
                }
                if let Some(answer) = &reply.response {
                    entries.push(ChatEntry::new(Speaker::Assistant, answer.as_str()));
                }
            }
        }
        InboundEvent::TextResponse(resp) if resp.is_ok() => {
            if let Some(answer) = resp.result.as_ref().and_then(|r| r.response.as_ref()) {
                entries.push(ChatEntry::new(Speaker::Assistant, answer.as_str()));
            }
        }
        _ => {}
    }
    entries
}

/// [`UiPort`] over shared state
#[derive(Clone, Default)]
pub struct UiProjection {
    state: Arc<Mutex<UiState>>,
}

impl UiProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle to the shared UI state
    pub fn get_state_handle(&self) -> Arc<Mutex<UiState>> {
        self.state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, UiState> {
        // a poisoned lock still holds consistent state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&mut self, f: impl FnOnce(&mut UiState)) {
        let mut state = self.lock();
        f(&mut state);
        state.revision += 1;
    }
}

impl UiPort for UiProjection {
    fn connection_changed(&mut self, connected: bool) {
        self.update(|s| s.connected = connected);
    }

    fn inbound(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::Status(update) => {
                let status = update.status.clone();
                self.update(|s| s.status_line = status);
            }
            InboundEvent::ControlResponse(resp) if resp.is_ok() => {
                let result = resp.result.clone().unwrap_or_default();
                let direction = result.direction.as_deref().and_then(Direction::parse);
                if let Some(direction) = direction {
                    let speed = result.speed.unwrap_or(0.0).clamp(0.0, 1.0);
                    self.update(|s| {
                        s.hud = Hud {
                            direction,
                            speed_percent: (speed * 100.0).round() as u32,
                        }
                    });
                }
            }
            InboundEvent::JoystickResponse(resp) if resp.is_ok() => {
                debug!("Joystick acknowledged");
            }
            _ => {
                if let Some(message) = failure_message(event) {
                    warn!("Remote command failed: {}", message);
                    return;
                }
                let entries = reply_entries(event);
                if !entries.is_empty() {
                    self.update(|s| {
                        for entry in entries {
                            s.push_chat(entry);
                        }
                    });
                }
            }
        }
    }

    fn movement_changed(&mut self, direction: Direction, speed_percent: u32) {
        self.update(|s| {
            s.hud = Hud {
                direction,
                speed_percent,
            }
        });
    }

    fn voice_changed(&mut self, status: VoiceStatus) {
        self.update(|s| s.voice = status);
    }

    fn media_changed(&mut self, state: MediaState, resolution: Option<VideoConfig>) {
        self.update(|s| {
            s.video = state.into();
            s.resolution = resolution;
        });
    }

    fn video_unsupported(&mut self) {
        self.update(|s| {
            s.video = VideoStatus::Unsupported;
            s.resolution = None;
        });
    }

    fn user_text(&mut self, text: &str) {
        let entry = ChatEntry::new(Speaker::User, text);
        self.update(|s| s.push_chat(entry));
    }
}

/// Describe a failed response, or `None` when `event` did not fail.
fn failure_message(event: &InboundEvent) -> Option<String> {
    let (kind, status, message) = match event {
        InboundEvent::Status(_) => return None,
        InboundEvent::ControlResponse(r) => ("control", &r.status, &r.message),
        InboundEvent::JoystickResponse(r) => ("joystick", &r.status, &r.message),
        InboundEvent::VoiceResponse(r) => ("voice", &r.status, &r.message),
        InboundEvent::TextResponse(r) => ("text", &r.status, &r.message),
    };
    if status == "ok" {
        return None;
    }
    Some(format!(
        "{} ({}): {}",
        kind,
        status,
        message.as_deref().unwrap_or("no message")
    ))
}

/// One-line rendering of the state for the console
pub fn render_summary(state: &UiState) -> String {
    let video = match state.resolution {
        Some(res) => format!("{} {}", state.video.as_str(), res),
        None => state.video.as_str().to_string(),
    };
    let mut line = format!(
        "[{}] {} | {} {}% | voice: {} | video: {}",
        if state.connected { "online" } else { "offline" },
        state.status_line,
        state.hud.direction,
        state.hud.speed_percent,
        state.voice,
        video,
    );
    if let Some(last) = state.chat.back() {
        line.push_str(&format!(" | {}: {}", last.speaker.as_str(), last.text));
    }
    line
}
