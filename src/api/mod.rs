//! Meeting history REST client
//!
//! Read/write access to meetings the backend has already persisted:
//! create, complete (summary generation), list, delete, and fetching the
//! stored transcript and speakers of a finished meeting.

mod client;
mod types;

pub use client::MeetingApi;
pub use types::{Meeting, MeetingStatus, Speaker, TranscriptRecord};
