use anyhow::{Context, Result};
use base64::Engine;
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::capture::{AudioCapture, CaptureError};
use super::chunk::AudioChunk;

/// Capture source that replays a WAV file as if it were a live microphone.
///
/// Samples are cut into fixed-duration chunks of 16-bit little-endian PCM,
/// base64-encoded the way the platform capture module delivers them, and
/// paced at real time so a session against a live backend behaves like an
/// actual meeting. Used by the CLI `record` command and in tests.
pub struct WavCapture {
    path: String,
    chunk_ms: u64,
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl WavCapture {
    pub fn open(path: impl AsRef<Path>, chunk_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            chunk_ms,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
            running: Arc::new(AtomicBool::new(false)),
            producer: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn samples_per_chunk(&self) -> usize {
        let per_second = self.sample_rate as u64 * self.channels as u64;
        ((per_second * self.chunk_ms) / 1000).max(1) as usize
    }
}

#[async_trait::async_trait]
impl AudioCapture for WavCapture {
    async fn request_permission(&self) -> Result<(), CaptureError> {
        // File replay needs no platform permission; the file was already
        // readable at open time.
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::Source("capture already started".into()));
        }

        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let samples = self.samples.clone();
        let samples_per_chunk = self.samples_per_chunk();
        let chunk_ms = self.chunk_ms;
        let running = Arc::clone(&self.running);

        let producer = tokio::spawn(async move {
            info!("WAV replay task started");

            for window in samples.chunks(samples_per_chunk) {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let pcm_bytes: Vec<u8> = window.iter().flat_map(|s| s.to_le_bytes()).collect();
                let chunk = AudioChunk::new(
                    base64::engine::general_purpose::STANDARD.encode(&pcm_bytes),
                    pcm_bytes.len(),
                );

                if tx.send(chunk).await.is_err() {
                    warn!("Chunk receiver dropped, stopping WAV replay");
                    break;
                }

                tokio::time::sleep(Duration::from_millis(chunk_ms)).await;
            }

            running.store(false, Ordering::SeqCst);
            info!("WAV replay task finished");
        });

        self.producer = Some(producer);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                warn!("WAV replay task panicked: {}", e);
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.path
    }
}
