//! Line-oriented operator commands for the console front end

use crate::client::Command;
use crate::media::{UnknownQuality, VideoQuality};
use crate::protocol::{Axis, ControlMessage, VoiceSetting};

pub const HELP: &str = "\
commands:
  move <deg> <px>        drag the movement joystick (0 = right, 90 = forward)
  release                let go of the movement joystick
  look <deg> <px>        drag the camera joystick
  look-release           let go of the camera joystick
  talk / over            start / stop push-to-talk
  say <text>             send a chat message
  drive <dir> <speed> [secs]
  camera <action> <value>
  volume <v> / rate <v>  speech output settings
  quality <low|medium|high>
  restart-video
  quit";

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error(transparent)]
    Quality(#[from] UnknownQuality),
}

fn number(arg: Option<&str>, usage: &'static str) -> Result<f64, ParseError> {
    let arg = arg.ok_or(ParseError::Usage(usage))?;
    arg.parse::<f64>()
        .map_err(|_| ParseError::NotANumber(arg.to_string()))
}

fn gesture(axis: Axis, args: &[&str], usage: &'static str) -> Result<Command, ParseError> {
    let degrees = number(args.first().copied(), usage)?;
    let distance = number(args.get(1).copied(), usage)?;
    Ok(Command::GestureMove {
        axis,
        angle: degrees.to_radians(),
        distance,
    })
}

/// Parse one console line. `help` is handled by the caller.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match word.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "move" => gesture(Axis::Movement, &args, "move <deg> <px>"),
        "release" => Ok(Command::GestureEnd(Axis::Movement)),
        "look" => gesture(Axis::Camera, &args, "look <deg> <px>"),
        "look-release" => Ok(Command::GestureEnd(Axis::Camera)),
        "talk" => Ok(Command::VoicePress),
        "over" => Ok(Command::VoiceRelease),
        "say" if !rest.is_empty() => Ok(Command::SendText(rest.to_string())),
        "say" => Err(ParseError::Usage("say <text>")),
        "drive" => {
            const USAGE: &str = "drive <forward|backward|left|right|stop> <speed> [secs]";
            let direction = args.first().ok_or(ParseError::Usage(USAGE))?;
            let speed = number(args.get(1).copied(), USAGE)?;
            let duration = match args.get(2) {
                Some(secs) => Some(number(Some(*secs), USAGE)?),
                None => None,
            };
            Ok(Command::Control(ControlMessage::drive(
                &direction.to_ascii_lowercase(),
                speed,
                duration,
            )))
        }
        "camera" => {
            const USAGE: &str = "camera <horizontal|vertical> <degrees>";
            let action = args.first().ok_or(ParseError::Usage(USAGE))?;
            let value = number(args.get(1).copied(), USAGE)?;
            Ok(Command::Control(ControlMessage::camera(action, value)))
        }
        "volume" => Ok(Command::Control(ControlMessage::voice_setting(
            VoiceSetting::Volume,
            number(args.first().copied(), "volume <0..1>")?,
        ))),
        "rate" => Ok(Command::Control(ControlMessage::voice_setting(
            VoiceSetting::Rate,
            number(args.first().copied(), "rate <words per minute>")?,
        ))),
        "quality" => {
            let name = args.first().ok_or(ParseError::Usage("quality <low|medium|high>"))?;
            Ok(Command::SetVideoQuality(name.parse::<VideoQuality>()?))
        }
        "restart-video" => Ok(Command::RestartVideo),
        "quit" | "exit" => Ok(Command::Shutdown),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gestures() {
        match parse_line("move 90 25").unwrap() {
            Command::GestureMove {
                axis,
                angle,
                distance,
            } => {
                assert_eq!(axis, Axis::Movement);
                assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
                assert_eq!(distance, 25.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_line("  release ").unwrap(), Command::GestureEnd(Axis::Movement));
        assert_eq!(parse_line("look-release").unwrap(), Command::GestureEnd(Axis::Camera));
        assert_eq!(
            parse_line("move 90").unwrap_err(),
            ParseError::Usage("move <deg> <px>")
        );
        assert_eq!(
            parse_line("look x 3").unwrap_err(),
            ParseError::NotANumber("x".into())
        );
    }

    #[test]
    fn chat_keeps_spacing() {
        assert_eq!(
            parse_line("say  go to   the door").unwrap(),
            Command::SendText("go to   the door".into())
        );
        assert!(parse_line("say").is_err());
    }

    #[test]
    fn control_commands() {
        let cmd = parse_line("drive FORWARD 0.6 2").unwrap();
        let Command::Control(msg) = cmd else {
            panic!("expected control command");
        };
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(
            value["data"],
            json!({ "command": "move", "params": { "direction": "forward", "speed": 0.6, "duration": 2.0 } })
        );

        let Command::Control(msg) = parse_line("volume 0.8").unwrap() else {
            panic!("expected control command");
        };
        assert_eq!(
            serde_json::to_value(msg).unwrap()["data"]["params"],
            json!({ "action": "volume", "value": 0.8 })
        );
    }

    #[test]
    fn video_and_lifecycle() {
        assert_eq!(
            parse_line("quality low").unwrap(),
            Command::SetVideoQuality(VideoQuality::Low)
        );
        assert!(matches!(parse_line("quality 8k"), Err(ParseError::Quality(_))));
        assert_eq!(parse_line("restart-video").unwrap(), Command::RestartVideo);
        assert_eq!(parse_line("quit").unwrap(), Command::Shutdown);
        assert_eq!(parse_line("").unwrap_err(), ParseError::Empty);
        assert_eq!(parse_line("dance").unwrap_err(), ParseError::Unknown("dance".into()));
    }
}
