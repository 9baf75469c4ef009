//! Platform backends for voice capture and video sessions

#[cfg(feature = "pulse")]
pub mod pulse;
#[cfg(feature = "webrtc")]
pub mod webrtc;

#[cfg(feature = "pulse")]
pub use pulse::PulseMicrophoneProvider;
#[cfg(feature = "webrtc")]
pub use webrtc::WebRtcConnector;
