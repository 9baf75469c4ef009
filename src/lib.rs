//! drivelink - operator client for a remotely driven robot
//!
//! Streams joystick input and push-to-talk audio to the robot over a
//! WebSocket control channel and keeps a peer video session alive.

pub mod backends;
pub mod channel;
pub mod client;
pub mod config;
pub mod console;
pub mod joystick;
pub mod media;
pub mod protocol;
pub mod signaling;
pub mod ui;
pub mod voice;

pub use client::{Command, Coordinator, MediaBackend};
pub use config::ClientConfig;
