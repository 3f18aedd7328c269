use serde::{Deserialize, Serialize};

/// One structured downlink message from the transcription backend.
///
/// Each WebSocket text frame carries exactly one of these, discriminated
/// by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Sent once per connection, confirming the backend-assigned session id
    Connected {
        #[serde(rename = "sessionId")]
        session_id: u64,
        message: String,
    },

    /// One incremental transcript segment
    Transcript {
        id: u64,
        content: String,
        timestamp: String,
        #[serde(rename = "speakerId")]
        speaker_id: Option<i64>,
    },

    /// Backend-reported failure; the connection stays up unless the
    /// server itself closes it
    Error { message: String },
}

impl InboundMessage {
    /// Parse one text frame. Unparseable payloads are the caller's cue to
    /// log and move on; they never close the channel.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
