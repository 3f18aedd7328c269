use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::SessionState;

/// Statistics about a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Where the session currently is in its lifecycle
    pub state: SessionState,

    /// Backend-assigned session id, once known
    pub session_id: Option<u64>,

    /// When the session started
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Number of audio chunks that made it onto the wire
    pub chunks_sent: usize,

    /// Number of transcript segments received
    pub transcript_segments: usize,
}

/// A single transcript segment pushed down by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptSegment {
    /// Backend-side transcript id
    pub id: u64,

    /// Transcribed text
    pub content: String,

    /// Backend-side timestamp, passed through verbatim
    pub timestamp: String,

    /// Diarized speaker, if the backend attributed one
    pub speaker_id: Option<i64>,

    /// When this segment arrived on the client
    pub received_at: DateTime<Utc>,
}
