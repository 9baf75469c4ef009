//! PulseAudio microphone for push-to-talk

use crate::voice::{
    ActiveCapture, CaptureSink, Microphone, MicrophoneProvider, VoiceError, SAMPLE_RATE,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use libpulse_binding as pulse;
use libpulse_binding::error::{Code, PAErr};
use libpulse_simple_binding as psimple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const CHANNELS: u8 = 1;
const CHUNK_DURATION_MS: u64 = 20;
const SAMPLES_PER_CHUNK: usize = (SAMPLE_RATE as u64 * CHUNK_DURATION_MS / 1000) as usize;

fn sample_spec() -> pulse::sample::Spec {
    pulse::sample::Spec {
        format: pulse::sample::Format::S16le,
        channels: CHANNELS,
        rate: SAMPLE_RATE,
    }
}

fn connect(device: Option<&str>) -> Result<psimple::Simple, PAErr> {
    psimple::Simple::new(
        None,
        "drivelink",
        pulse::stream::Direction::Record,
        device,
        "push-to-talk",
        &sample_spec(),
        None,
        None,
    )
}

/// No reachable server means no capture on this host at all; only an
/// access error is a denial the operator can fix.
fn access_error(e: PAErr) -> VoiceError {
    if e == PAErr::from(Code::ConnectionRefused) || e == PAErr::from(Code::InvalidServer) {
        VoiceError::UnsupportedCapability
    } else if e == PAErr::from(Code::Access) {
        VoiceError::PermissionDenied(e.to_string())
    } else {
        VoiceError::CaptureStart(e.to_string())
    }
}

/// Opens a throwaway record stream to find out whether we may capture.
pub struct PulseMicrophoneProvider {
    device: Option<String>,
}

impl PulseMicrophoneProvider {
    /// `device` of `None` records from the default source.
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl MicrophoneProvider for PulseMicrophoneProvider {
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_access(&self) -> Result<Arc<dyn Microphone>, VoiceError> {
        let device = self.device.clone();
        let probe = tokio::task::spawn_blocking(move || connect(device.as_deref()).map(drop))
            .await
            .map_err(|e| VoiceError::CaptureStart(e.to_string()))?;
        match probe {
            Ok(()) => {
                info!("PulseAudio microphone available");
                Ok(Arc::new(PulseMicrophone {
                    device: self.device.clone(),
                }))
            }
            Err(e) => {
                warn!("PulseAudio microphone unavailable: {}", e);
                Err(access_error(e))
            }
        }
    }
}

pub struct PulseMicrophone {
    device: Option<String>,
}

struct PulseCapture {
    stop: Arc<AtomicBool>,
}

impl ActiveCapture for PulseCapture {
    fn stop(self: Box<Self>) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Microphone for PulseMicrophone {
    fn start(&self, sink: CaptureSink) -> Result<Box<dyn ActiveCapture>, VoiceError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let device = self.device.clone();

        std::thread::Builder::new()
            .name("pulse-capture".into())
            .spawn(move || {
                let result = connect(device.as_deref())
                    .context("Failed to create PulseAudio microphone connection")
                    .and_then(|capture| capture_until_stopped(capture, &sink, &stop_flag));
                match result {
                    Ok(()) => {
                        sink.stopped();
                    }
                    Err(e) => {
                        error!("Microphone capture error: {:#}", e);
                        sink.failed(format!("{:#}", e));
                    }
                }
            })
            .map_err(|e| VoiceError::CaptureStart(e.to_string()))?;

        Ok(Box::new(PulseCapture { stop }))
    }
}

fn capture_until_stopped(
    capture: psimple::Simple,
    sink: &CaptureSink,
    stop: &AtomicBool,
) -> Result<()> {
    debug!("Capturing session {} in {}ms chunks", sink.session(), CHUNK_DURATION_MS);
    let mut bytes = vec![0u8; SAMPLES_PER_CHUNK * 2];

    while !stop.load(Ordering::SeqCst) {
        capture.read(&mut bytes).context("Failed to read audio")?;
        let chunk: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if !sink.chunk(chunk) {
            // coordinator is gone
            return Ok(());
        }
    }
    Ok(())
}
