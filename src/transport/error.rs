use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The wire closed before the backend confirmed the session
    #[error("connection closed before session was confirmed: {0}")]
    ClosedBeforeConnected(String),

    #[error("timed out waiting for session confirmation")]
    ConnectTimeout,

    /// `send_audio` on a channel that is no longer open
    #[error("channel is not open")]
    NotOpen,

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}
