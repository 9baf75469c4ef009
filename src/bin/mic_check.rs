/// Push-to-talk microphone check
/// Records a few seconds through the same capture path the client uses and
/// writes the result to a WAV file.
use anyhow::{bail, Context, Result};
use drivelink::backends::PulseMicrophoneProvider;
use drivelink::voice::{encode_clip, CaptureEvent, CaptureSink, MicrophoneProvider, VoiceEvent, SAMPLE_RATE};
use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

fn save_wav(chunks: &[Vec<i16>], filename: &str) -> Result<()> {
    let file = File::create(filename).with_context(|| format!("Failed to create {}", filename))?;
    let mut writer = BufWriter::new(file);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav_writer = hound::WavWriter::new(&mut writer, spec)?;
    for sample in chunks.iter().flatten() {
        wav_writer.write_sample(*sample)?;
    }
    wav_writer.finalize()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let seconds: u64 = match args.next() {
        Some(s) => s.parse().context("seconds must be a whole number")?,
        None => 3,
    };
    let output = args.next().unwrap_or_else(|| "mic_check.wav".to_string());

    let provider = PulseMicrophoneProvider::new(std::env::var("DRIVELINK_MIC_DEVICE").ok());
    let mic = provider
        .request_access()
        .await
        .context("Microphone access failed")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let capture = mic.start(CaptureSink::new(1, tx))?;
    println!("Recording for {}s, speak now", seconds);

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    capture.stop();

    let mut chunks = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            VoiceEvent::Capture {
                event: CaptureEvent::Chunk(samples),
                ..
            } => chunks.push(samples),
            VoiceEvent::Capture {
                event: CaptureEvent::Stopped,
                ..
            } => break,
            VoiceEvent::Capture {
                event: CaptureEvent::Failed(reason),
                ..
            } => bail!("Capture failed: {}", reason),
            VoiceEvent::Access(_) => {}
        }
    }

    let samples: usize = chunks.iter().map(Vec::len).sum();
    let payload = encode_clip(&chunks)?;
    info!(
        "Captured {} samples ({:.1}s), {} bytes as base64 WAV",
        samples,
        samples as f64 / SAMPLE_RATE as f64,
        payload.len()
    );

    save_wav(&chunks, &output)?;
    println!("Saved {}", output);
    Ok(())
}
