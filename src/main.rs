//! drivelink console client
//!
//! Reads operator commands from stdin, drives the robot over the control
//! channel and prints a status line whenever the UI state changes.

#![forbid(unsafe_code)]

use anyhow::Context;
use drivelink::channel::ControlChannel;
use drivelink::client::{Command, Coordinator, MediaBackend};
use drivelink::config::ClientConfig;
use drivelink::console::{parse_line, ParseError, HELP};
use drivelink::ui::{render_summary, UiProjection};
use drivelink::voice::MicrophoneProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const RENDER_POLL: Duration = Duration::from_millis(200);

fn microphones() -> Arc<dyn MicrophoneProvider> {
    #[cfg(feature = "pulse")]
    {
        let device = std::env::var("DRIVELINK_MIC_DEVICE").ok();
        Arc::new(drivelink::backends::PulseMicrophoneProvider::new(device))
    }
    #[cfg(not(feature = "pulse"))]
    {
        Arc::new(drivelink::voice::NoMicrophone)
    }
}

fn media_backend(config: &ClientConfig) -> anyhow::Result<Option<MediaBackend>> {
    #[cfg(feature = "webrtc")]
    {
        let signaling = drivelink::signaling::HttpSignaling::new(config.signaling_url.clone())
            .context("Failed to build signaling client")?;
        Ok(Some(MediaBackend {
            connector: Arc::new(drivelink::backends::WebRtcConnector::default()),
            signaling: Arc::new(signaling),
        }))
    }
    #[cfg(not(feature = "webrtc"))]
    {
        info!(
            "Built without webrtc, video from {} disabled",
            config.signaling_url
        );
        Ok(None)
    }
}

async fn read_commands(commands: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().eq_ignore_ascii_case("help") {
            println!("{}", HELP);
            continue;
        }
        match parse_line(&line) {
            Ok(cmd) => {
                if commands.send(cmd).is_err() {
                    return;
                }
            }
            Err(ParseError::Empty) => {}
            Err(e) => warn!("{}", e),
        }
    }
    let _ = commands.send(Command::Shutdown);
}

async fn render(ui: UiProjection) {
    let state = ui.get_state_handle();
    let mut seen = u64::MAX;
    let mut ticker = tokio::time::interval(RENDER_POLL);
    loop {
        ticker.tick().await;
        let summary = {
            let state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.revision == seen {
                continue;
            }
            seen = state.revision;
            render_summary(&state)
        };
        println!("{}", summary);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drivelink=info")),
        )
        .init();

    let config = ClientConfig::from_env().context("Invalid configuration")?;
    info!("Connecting to {}", config.server_url);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (channel, channel_task) =
        ControlChannel::spawn(config.server_url.clone(), config.reconnect_delay, event_tx);

    let ui = UiProjection::new();
    let coordinator = Coordinator::new(
        &config,
        channel,
        microphones(),
        media_backend(&config)?,
        ui.clone(),
    );

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let ctrl_c_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(Command::Shutdown);
        }
    });
    tokio::spawn(read_commands(cmd_tx));
    let renderer = tokio::spawn(render(ui));

    println!("Type 'help' for commands");
    coordinator.run(cmd_rx, event_rx).await;

    renderer.abort();
    channel_task.abort();
    info!("Shut down");
    Ok(())
}
