//! Control channel wire format
//!
//! Every frame on the control channel is a JSON text frame of the form
//! `{"event": <kind>, "data": <payload>}`. Outbound kinds are `control`,
//! `joystick`, `voice` and `text`; inbound kinds are `status` plus one
//! `*_response` per outbound kind.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Which on-screen joystick a gesture belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Movement,
    Camera,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Movement, Axis::Camera];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::Camera => "camera",
        }
    }
}

/// `control` payload: a named command with free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

/// `joystick` payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoystickPayload {
    #[serde(rename = "type")]
    pub axis: Axis,
    pub x: f64,
    pub y: f64,
}

/// `voice` payload: base64 text of a WAV clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicePayload {
    pub audio: String,
}

/// `text` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

/// Voice settings adjustable on the remote speech engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSetting {
    Volume,
    Rate,
}

impl VoiceSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Rate => "rate",
        }
    }
}

/// Message sent from client to the remote controller.
///
/// Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    Control(ControlCommand),
    Joystick(JoystickPayload),
    Voice(VoicePayload),
    Text(TextPayload),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control(_) => "control",
            Self::Joystick(_) => "joystick",
            Self::Voice(_) => "voice",
            Self::Text(_) => "text",
        }
    }

    /// Joystick sample, each component rounded to two decimals.
    pub fn joystick(axis: Axis, x: f64, y: f64) -> Self {
        Self::Joystick(JoystickPayload {
            axis,
            x: quantize(x),
            y: quantize(y),
        })
    }

    pub fn voice(audio: impl Into<String>) -> Self {
        Self::Voice(VoicePayload { audio: audio.into() })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPayload { text: text.into() })
    }

    pub fn command(command: impl Into<String>, params: Value) -> Self {
        Self::Control(ControlCommand {
            command: command.into(),
            params,
        })
    }

    /// Discrete drive command; `speed` is clamped to 0..1 remotely.
    pub fn drive(direction: &str, speed: f64, duration: Option<f64>) -> Self {
        let mut params = json!({ "direction": direction, "speed": speed });
        if let Some(duration) = duration {
            params["duration"] = json!(duration);
        }
        Self::command("move", params)
    }

    /// Gimbal command, e.g. `horizontal` / `vertical` in degrees.
    pub fn camera(action: &str, value: f64) -> Self {
        Self::command("camera", json!({ "action": action, "value": value }))
    }

    pub fn voice_setting(setting: VoiceSetting, value: f64) -> Self {
        Self::command(
            "voice_settings",
            json!({ "action": setting.as_str(), "value": value }),
        )
    }
}

/// Round to two decimal places, folding `-0.0` into `0.0`.
pub fn quantize(v: f64) -> f64 {
    let q = (v * 100.0).round() / 100.0;
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

pub fn encode(msg: &ControlMessage) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

/// `status` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Generic `*_response` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response<T> {
    pub status: String,
    pub result: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Result of a `control` command. Only drive commands report a direction.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ControlResult {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct VoiceReply {
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TextReply {
    #[serde(default)]
    pub response: Option<String>,
}

/// Message received from the remote controller
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    Status(StatusUpdate),
    ControlResponse(Response<ControlResult>),
    JoystickResponse(Response<Value>),
    VoiceResponse(Response<VoiceReply>),
    TextResponse(Response<TextReply>),
}

const INBOUND_KINDS: [&str; 5] = [
    "status",
    "control_response",
    "joystick_response",
    "voice_response",
    "text_response",
];

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode an inbound text frame. Unknown event kinds yield `Ok(None)`.
pub fn decode(text: &str) -> serde_json::Result<Option<InboundEvent>> {
    let raw: RawFrame = serde_json::from_str(text)?;
    if !INBOUND_KINDS.contains(&raw.event.as_str()) {
        return Ok(None);
    }
    serde_json::from_value(json!({ "event": raw.event, "data": raw.data })).map(Some)
}
