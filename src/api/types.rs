use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingStatus {
    Recording,
    Completed,
}

/// A meeting as persisted by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: u64,
    pub title: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    pub status: MeetingStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One persisted transcript line of a finished meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub id: u64,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub speaker_id: Option<i64>,
    pub sequence_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: i64,
    pub name: String,
    pub color: String,
}
