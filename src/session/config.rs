use std::time::Duration;

use crate::transport::ReconnectPolicy;

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the transcription backend
    pub endpoint: String,

    /// Chunks accumulated before one outbound frame is sent.
    /// 1 passes every chunk straight through (for VAD-segmented sources).
    pub batch_size: usize,

    /// How long to wait for the backend's session confirmation
    pub connect_timeout: Duration,

    /// Upper bound on `stop_session` cleanup
    pub cleanup_timeout: Duration,

    /// Retry policy after a spontaneous connection loss
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws/audio-stream".to_string(),
            batch_size: 3, // ~3 seconds of audio per frame at 1s chunks
            connect_timeout: Duration::from_secs(10),
            cleanup_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
