//! Client configuration

use crate::joystick::DEFAULT_RADIUS;
use crate::media::{UnknownQuality, VideoQuality};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a positive number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var}: {source}")]
    InvalidQuality {
        var: &'static str,
        #[source]
        source: UnknownQuality,
    },

    #[error("{var} must be a ws:// or wss:// URL, got '{value}'")]
    InvalidUrl { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control channel WebSocket endpoint
    pub server_url: String,
    /// HTTP endpoint taking an SDP offer and returning the answer
    pub signaling_url: String,
    /// Joystick sampling period
    pub tick: Duration,
    /// Drag distance in pixels that maps to full deflection
    pub joystick_radius: f64,
    pub reconnect_delay: Duration,
    pub video_quality: VideoQuality,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:5000/ws".to_string(),
            signaling_url: "http://localhost:5000/offer".to_string(),
            tick: Duration::from_millis(100),
            joystick_radius: DEFAULT_RADIUS,
            reconnect_delay: Duration::from_secs(2),
            video_quality: VideoQuality::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `DRIVELINK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("DRIVELINK_SERVER_URL") {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidUrl {
                    var: "DRIVELINK_SERVER_URL",
                    value: url,
                });
            }
            config.server_url = url;
        }
        if let Some(url) = lookup("DRIVELINK_SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Some(ms) = lookup("DRIVELINK_TICK_MS") {
            config.tick = Duration::from_millis(parse_positive("DRIVELINK_TICK_MS", &ms)? as u64);
        }
        if let Some(radius) = lookup("DRIVELINK_JOYSTICK_RADIUS") {
            config.joystick_radius = parse_positive("DRIVELINK_JOYSTICK_RADIUS", &radius)?;
        }
        if let Some(ms) = lookup("DRIVELINK_RECONNECT_MS") {
            config.reconnect_delay =
                Duration::from_millis(parse_positive("DRIVELINK_RECONNECT_MS", &ms)? as u64);
        }
        if let Some(quality) = lookup("DRIVELINK_VIDEO_QUALITY") {
            config.video_quality =
                quality
                    .parse()
                    .map_err(|source| ConfigError::InvalidQuality {
                        var: "DRIVELINK_VIDEO_QUALITY",
                        source,
                    })?;
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 1.0 => Ok(v),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tick, Duration::from_millis(100));
        assert_eq!(config.joystick_radius, 50.0);
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.video_quality, VideoQuality::Medium);
    }

    #[test]
    fn overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DRIVELINK_SERVER_URL", "wss://rover.local/ws"),
            ("DRIVELINK_TICK_MS", "50"),
            ("DRIVELINK_JOYSTICK_RADIUS", "80"),
            ("DRIVELINK_VIDEO_QUALITY", "high"),
            ("DRIVELINK_SIGNALING_URL", "http://rover.local:8080/offer"),
            ("DRIVELINK_RECONNECT_MS", "750"),
        ]))
        .unwrap();
        assert_eq!(config.server_url, "wss://rover.local/ws");
        assert_eq!(config.signaling_url, "http://rover.local:8080/offer");
        assert_eq!(config.reconnect_delay, Duration::from_millis(750));
        assert_eq!(config.tick, Duration::from_millis(50));
        assert_eq!(config.joystick_radius, 80.0);
        assert_eq!(config.video_quality, VideoQuality::High);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("DRIVELINK_TICK_MS", "0")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("DRIVELINK_JOYSTICK_RADIUS", "wide")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("DRIVELINK_VIDEO_QUALITY", "4k")])),
            Err(ConfigError::InvalidQuality { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("DRIVELINK_SERVER_URL", "http://x")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
