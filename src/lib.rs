pub mod api;
pub mod audio;
pub mod config;
pub mod session;
pub mod transport;

pub use api::{Meeting, MeetingApi, MeetingStatus, Speaker, TranscriptRecord};
pub use audio::{AudioBatch, AudioCapture, AudioChunk, CaptureError, ChunkAggregator, WavCapture};
pub use config::Config;
pub use session::{
    SessionConfig, SessionController, SessionError, SessionState, SessionStats, TranscriptSegment,
};
pub use transport::{
    ChannelEvent, InboundMessage, ReconnectPolicy, ReconnectSupervisor, TransportChannel,
    TransportError, WebSocketDialer, WireDialer, WireEvent, WireStream,
};
