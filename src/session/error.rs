use thiserror::Error;

use crate::audio::CaptureError;

/// Failure classes surfaced by the session engine.
///
/// `Clone` because terminal failures fan out to every subscribed error
/// observer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Capture permission refused; surfaced to the `start_session` caller,
    /// never retried
    #[error("audio capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio capture failed: {0}")]
    Capture(String),

    /// Initial connect failed; the caller decides whether to try again
    #[error("failed to connect: {0}")]
    ConnectFailure(String),

    /// The connection dropped while active and could not be recovered
    #[error("connection lost after {attempts} reconnect attempts, session closed")]
    ReconnectExhausted { attempts: u32 },

    /// Backend-reported error; the session stays active
    #[error("server error: {0}")]
    Server(String),

    /// `start_session` while another session is connecting or active
    #[error("a session is already in progress")]
    SessionInProgress,

    #[error("session cleanup timed out")]
    CleanupTimeout,
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            CaptureError::Source(msg) => SessionError::Capture(msg),
        }
    }
}
