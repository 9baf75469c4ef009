//! Push-to-talk voice capture
//!
//! A pure state machine driven by the coordinator. Permission requests and
//! capture streams run elsewhere and report back as [`VoiceEvent`]s; every
//! transition pushes [`VoiceAction`]s into an outbox drained after the event.
//!
//! ```text
//! idle --press (mic held)--> recording
//! idle --press (no mic)----> requesting --granted--> idle
//!                            requesting --denied---> idle [denied]
//! recording --chunk--> recording
//! recording --release--> processing --stopped, encoded, sent--> idle
//! recording --capture error--> idle [error]
//! ```

use crate::protocol::ControlMessage;
use async_trait::async_trait;
use base64::Engine;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capture format: 16 kHz mono, signed 16-bit
pub const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VoiceError {
    #[error("microphone capture is not available")]
    UnsupportedCapability,
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("failed to start capture: {0}")]
    CaptureStart(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("failed to encode recording: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Requesting,
    Recording,
    Processing,
}

/// User-visible voice status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Ready,
    Requesting,
    Recording,
    Processing,
    Denied,
    Error,
    Unsupported,
}

impl VoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Requesting => "requesting",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Denied => "denied",
            Self::Error => "error",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events produced by a running capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Chunk(Vec<i16>),
    /// The device finished flushing after `stop`
    Stopped,
    Failed(String),
}

pub enum VoiceEvent {
    Access(Result<Arc<dyn Microphone>, VoiceError>),
    Capture { session: u64, event: CaptureEvent },
}

impl fmt::Debug for VoiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access(Ok(_)) => f.write_str("Access(granted)"),
            Self::Access(Err(e)) => write!(f, "Access({:?})", e),
            Self::Capture { session, event } => f
                .debug_struct("Capture")
                .field("session", session)
                .field("event", event)
                .finish(),
        }
    }
}

/// Where a capture backend delivers its chunks. Tagged with the recording
/// session so late events from an earlier recording are ignored.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    session: u64,
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl CaptureSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    fn post(&self, event: CaptureEvent) -> bool {
        self.tx
            .send(VoiceEvent::Capture {
                session: self.session,
                event,
            })
            .is_ok()
    }

    /// Returns false once the coordinator is gone.
    pub fn chunk(&self, samples: Vec<i16>) -> bool {
        self.post(CaptureEvent::Chunk(samples))
    }

    pub fn stopped(&self) -> bool {
        self.post(CaptureEvent::Stopped)
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.post(CaptureEvent::Failed(reason.into()))
    }
}

/// Handle to a running capture
pub trait ActiveCapture: Send {
    /// Ask the device to stop. The backend flushes remaining chunks and then
    /// reports [`CaptureEvent::Stopped`] through its sink.
    fn stop(self: Box<Self>);
}

/// A granted microphone, reused for every recording
pub trait Microphone: Send + Sync {
    fn start(&self, sink: CaptureSink) -> Result<Box<dyn ActiveCapture>, VoiceError>;
}

#[async_trait]
pub trait MicrophoneProvider: Send + Sync {
    /// Whether capture exists at all on this host
    fn is_supported(&self) -> bool;

    async fn request_access(&self) -> Result<Arc<dyn Microphone>, VoiceError>;
}

/// Provider for hosts without any capture backend
pub struct NoMicrophone;

#[async_trait]
impl MicrophoneProvider for NoMicrophone {
    fn is_supported(&self) -> bool {
        false
    }

    async fn request_access(&self) -> Result<Arc<dyn Microphone>, VoiceError> {
        Err(VoiceError::UnsupportedCapability)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceAction {
    /// Run `MicrophoneProvider::request_access` and post the outcome
    RequestAccess,
    Send(ControlMessage),
    Status(VoiceStatus),
}

pub struct VoiceCapture {
    state: VoiceState,
    supported: bool,
    mic: Option<Arc<dyn Microphone>>,
    active: Option<Box<dyn ActiveCapture>>,
    session: u64,
    chunks: Vec<Vec<i16>>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    actions: Vec<VoiceAction>,
}

impl VoiceCapture {
    pub fn new(supported: bool, events: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        let mut voice = Self {
            state: VoiceState::Idle,
            supported,
            mic: None,
            active: None,
            session: 0,
            chunks: Vec::new(),
            events,
            actions: Vec::new(),
        };
        if supported {
            voice.actions.push(VoiceAction::Status(VoiceStatus::Ready));
        } else {
            info!("Microphone capture unavailable, push-to-talk disabled");
            voice.actions.push(VoiceAction::Status(VoiceStatus::Unsupported));
        }
        voice
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn has_microphone(&self) -> bool {
        self.mic.is_some()
    }

    pub fn press(&mut self) {
        if !self.supported {
            debug!("Voice press ignored, capture unsupported");
            return;
        }
        match self.state {
            VoiceState::Idle => match self.mic.clone() {
                Some(mic) => self.begin_recording(mic),
                None => {
                    self.state = VoiceState::Requesting;
                    self.actions.push(VoiceAction::RequestAccess);
                    self.actions.push(VoiceAction::Status(VoiceStatus::Requesting));
                }
            },
            other => debug!("Voice press ignored in {:?}", other),
        }
    }

    fn begin_recording(&mut self, mic: Arc<dyn Microphone>) {
        self.chunks.clear();
        self.session += 1;
        let sink = CaptureSink::new(self.session, self.events.clone());
        match mic.start(sink) {
            Ok(handle) => {
                info!("Recording started (session {})", self.session);
                self.active = Some(handle);
                self.state = VoiceState::Recording;
                self.actions.push(VoiceAction::Status(VoiceStatus::Recording));
            }
            Err(e) => {
                warn!("Could not start recording: {}", e);
                self.state = VoiceState::Idle;
                self.actions.push(VoiceAction::Status(VoiceStatus::Error));
            }
        }
    }

    pub fn on_access(&mut self, result: Result<Arc<dyn Microphone>, VoiceError>) {
        if self.state != VoiceState::Requesting {
            debug!("Late microphone access result ignored");
            return;
        }
        self.state = VoiceState::Idle;
        match result {
            Ok(mic) => {
                info!("Microphone access granted");
                self.mic = Some(mic);
                self.actions.push(VoiceAction::Status(VoiceStatus::Ready));
            }
            Err(VoiceError::PermissionDenied(reason)) => {
                warn!("Microphone access denied: {}", reason);
                self.actions.push(VoiceAction::Status(VoiceStatus::Denied));
            }
            Err(VoiceError::UnsupportedCapability) => {
                warn!("Microphone capture unavailable, push-to-talk disabled");
                self.supported = false;
                self.actions.push(VoiceAction::Status(VoiceStatus::Unsupported));
            }
            Err(e) => {
                error!("Microphone access failed: {}", e);
                self.actions.push(VoiceAction::Status(VoiceStatus::Error));
            }
        }
    }

    pub fn release(&mut self) {
        if self.state != VoiceState::Recording {
            debug!("Voice release ignored in {:?}", self.state);
            return;
        }
        self.state = VoiceState::Processing;
        self.actions.push(VoiceAction::Status(VoiceStatus::Processing));
        if let Some(handle) = self.active.take() {
            handle.stop();
        }
    }

    pub fn on_capture(&mut self, session: u64, event: CaptureEvent) {
        if session != self.session {
            debug!("Dropping capture event from stale session {}", session);
            return;
        }
        match (self.state, event) {
            (VoiceState::Recording | VoiceState::Processing, CaptureEvent::Chunk(samples)) => {
                self.chunks.push(samples);
            }
            (VoiceState::Processing, CaptureEvent::Stopped) => self.finish(),
            (VoiceState::Recording, CaptureEvent::Stopped) => {
                self.abort("capture ended before release".to_string());
            }
            (VoiceState::Recording | VoiceState::Processing, CaptureEvent::Failed(reason)) => {
                self.abort(reason);
            }
            (state, event) => debug!("Ignoring {:?} in {:?}", event, state),
        }
    }

    fn finish(&mut self) {
        let chunks = std::mem::take(&mut self.chunks);
        self.state = VoiceState::Idle;
        match encode_clip(&chunks) {
            Ok(audio) => {
                info!(
                    "Recording complete: {} chunks, {} encoded bytes",
                    chunks.len(),
                    audio.len()
                );
                self.actions.push(VoiceAction::Send(ControlMessage::voice(audio)));
                self.actions.push(VoiceAction::Status(VoiceStatus::Ready));
            }
            Err(e) => {
                error!("{}", e);
                self.actions.push(VoiceAction::Status(VoiceStatus::Error));
            }
        }
    }

    fn abort(&mut self, reason: String) {
        error!("Capture error: {}", reason);
        if let Some(handle) = self.active.take() {
            handle.stop();
        }
        self.chunks.clear();
        self.state = VoiceState::Idle;
        self.actions.push(VoiceAction::Status(VoiceStatus::Error));
    }

    /// Stop any running capture and discard its audio. Events still in
    /// flight from that capture are treated as stale.
    pub fn close(&mut self) {
        if let Some(handle) = self.active.take() {
            info!("Stopping recording (session {}) on close", self.session);
            handle.stop();
        }
        self.session += 1;
        self.chunks.clear();
        self.state = VoiceState::Idle;
    }

    pub fn drain_actions(&mut self) -> Vec<VoiceAction> {
        std::mem::take(&mut self.actions)
    }
}

/// Concatenate chunks in capture order, wrap them as a 16 kHz mono WAV and
/// base64 the result.
pub fn encode_clip(chunks: &[Vec<i16>]) -> Result<String, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Encode(e.to_string()))?;
        for sample in chunks.iter().flatten() {
            writer
                .write_sample(*sample)
                .map_err(|e| VoiceError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Encode(e.to_string()))?;
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMic {
        starts: AtomicUsize,
        stops: Arc<AtomicUsize>,
        sinks: Mutex<Vec<CaptureSink>>,
        fail_start: bool,
    }

    struct FakeHandle {
        stops: Arc<AtomicUsize>,
    }

    impl ActiveCapture for FakeHandle {
        fn stop(self: Box<Self>) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Microphone for FakeMic {
        fn start(&self, sink: CaptureSink) -> Result<Box<dyn ActiveCapture>, VoiceError> {
            if self.fail_start {
                return Err(VoiceError::CaptureStart("device busy".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(FakeHandle {
                stops: self.stops.clone(),
            }))
        }
    }

    fn granted(voice: &mut VoiceCapture, mic: Arc<FakeMic>) {
        voice.press();
        assert_eq!(voice.state(), VoiceState::Requesting);
        voice.on_access(Ok(mic));
        assert_eq!(voice.state(), VoiceState::Idle);
        voice.drain_actions();
    }

    fn statuses(actions: &[VoiceAction]) -> Vec<VoiceStatus> {
        actions
            .iter()
            .filter_map(|a| match a {
                VoiceAction::Status(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn sent(actions: &[VoiceAction]) -> Vec<&ControlMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                VoiceAction::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_press_requests_access_without_recording() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        assert_eq!(statuses(&voice.drain_actions()), vec![VoiceStatus::Ready]);

        voice.press();
        let actions = voice.drain_actions();
        assert!(actions.contains(&VoiceAction::RequestAccess));
        assert_eq!(statuses(&actions), vec![VoiceStatus::Requesting]);

        // a second press while requesting does nothing
        voice.press();
        assert!(voice.drain_actions().is_empty());
    }

    #[test]
    fn denied_returns_to_idle_and_rerequests_on_next_press() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        voice.press();
        voice.on_access(Err(VoiceError::PermissionDenied("blocked".into())));
        let actions = voice.drain_actions();
        assert_eq!(voice.state(), VoiceState::Idle);
        assert_eq!(statuses(&actions).last(), Some(&VoiceStatus::Denied));
        assert!(sent(&actions).is_empty());

        voice.press();
        assert!(voice.drain_actions().contains(&VoiceAction::RequestAccess));
    }

    #[test]
    fn unsupported_disables_permanently() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(false, tx);
        assert_eq!(statuses(&voice.drain_actions()), vec![VoiceStatus::Unsupported]);
        voice.press();
        voice.release();
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(voice.drain_actions().is_empty());
    }

    #[test]
    fn close_stops_recording_and_drops_its_audio() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        let mic = Arc::new(FakeMic::default());
        granted(&mut voice, mic.clone());

        voice.press();
        let session = mic.sinks.lock().unwrap()[0].session();
        voice.on_capture(session, CaptureEvent::Chunk(vec![7; 320]));
        voice.drain_actions();

        voice.close();
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(voice.state(), VoiceState::Idle);

        // the backend's late stop report must not produce a clip
        voice.on_capture(session, CaptureEvent::Stopped);
        assert!(sent(&voice.drain_actions()).is_empty());

        // closing while idle touches nothing
        voice.close();
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_press_starts_one_capture() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        let mic = Arc::new(FakeMic::default());
        granted(&mut voice, mic.clone());

        voice.press();
        voice.press();
        assert_eq!(voice.state(), VoiceState::Recording);
        assert_eq!(mic.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_sends_chunks_in_capture_order() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        let mic = Arc::new(FakeMic::default());
        granted(&mut voice, mic.clone());

        voice.press();
        let session = mic.sinks.lock().unwrap()[0].session();
        voice.on_capture(session, CaptureEvent::Chunk(vec![1, 2]));
        voice.on_capture(session, CaptureEvent::Chunk(vec![3]));
        voice.release();
        assert_eq!(voice.state(), VoiceState::Processing);
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);

        // flushed tail chunk after stop still belongs to this recording
        voice.on_capture(session, CaptureEvent::Chunk(vec![4, 5]));
        voice.on_capture(session, CaptureEvent::Stopped);
        assert_eq!(voice.state(), VoiceState::Idle);

        let actions = voice.drain_actions();
        let messages = sent(&actions);
        assert_eq!(messages.len(), 1);
        let expected = encode_clip(&[vec![1, 2, 3, 4, 5]]).unwrap();
        assert_eq!(messages[0], &ControlMessage::voice(expected));
        assert_eq!(statuses(&actions).last(), Some(&VoiceStatus::Ready));
    }

    #[test]
    fn release_outside_recording_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        voice.drain_actions();
        voice.release();
        assert!(voice.drain_actions().is_empty());
    }

    #[test]
    fn capture_error_resets_to_idle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        let mic = Arc::new(FakeMic::default());
        granted(&mut voice, mic.clone());

        voice.press();
        voice.on_capture(1, CaptureEvent::Chunk(vec![7; 320]));
        voice.on_capture(1, CaptureEvent::Failed("device unplugged".into()));
        let actions = voice.drain_actions();
        assert_eq!(voice.state(), VoiceState::Idle);
        assert_eq!(statuses(&actions).last(), Some(&VoiceStatus::Error));
        assert!(sent(&actions).is_empty());

        // stale events from the aborted session are dropped
        voice.press();
        voice.drain_actions();
        voice.on_capture(1, CaptureEvent::Stopped);
        assert_eq!(voice.state(), VoiceState::Recording);
    }

    #[test]
    fn start_failure_reports_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut voice = VoiceCapture::new(true, tx);
        let mic = Arc::new(FakeMic {
            fail_start: true,
            ..Default::default()
        });
        granted(&mut voice, mic);
        voice.press();
        assert_eq!(voice.state(), VoiceState::Idle);
        assert_eq!(statuses(&voice.drain_actions()), vec![VoiceStatus::Error]);
    }

    #[test]
    fn empty_clip_is_a_bare_wav_header() {
        let encoded = encode_clip(&[]).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn encoded_clip_round_trips_through_hound() {
        let encoded = encode_clip(&[vec![-3, 0], vec![32_000]]).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![-3, 0, 32_000]);
    }
}
