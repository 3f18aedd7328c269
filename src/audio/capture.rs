use thiserror::Error;
use tokio::sync::mpsc;

use super::chunk::AudioChunk;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The platform refused microphone/recording access
    #[error("audio capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture source failed: {0}")]
    Source(String),
}

/// Audio capture source trait
///
/// The engine consumes opaque, already-encoded chunks; where they come
/// from (a platform microphone module, a VAD-segmenting recorder, a file
/// replayed for testing) is behind this seam. Implementations:
/// - `WavCapture`: replays a WAV file as paced PCM chunks
/// - test doubles driven directly through the chunk channel
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Ask the platform for recording permission.
    ///
    /// Must be called before `start`; a denial is surfaced to the caller
    /// of `start_session` immediately and is never retried.
    async fn request_permission(&self) -> Result<(), CaptureError>;

    /// Start producing chunks.
    ///
    /// Returns a channel receiver that will receive audio chunks in
    /// capture order.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError>;

    /// Stop producing chunks
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}
