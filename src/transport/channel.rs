use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::messages::InboundMessage;
use super::wire::{WireDialer, WireEvent, WireStream};
use crate::audio::AudioBatch;

/// An event surfaced by an open channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// One parsed downlink message
    Message(InboundMessage),
    /// The channel is gone. `deliberate` distinguishes our own `close`
    /// from a spontaneous failure; only the latter warrants reconnection.
    Closed { reason: String, deliberate: bool },
}

/// Owns exactly one duplex connection to the transcription backend.
///
/// `open` resolves only once the backend has confirmed the session, so a
/// channel in hand always has a session id. Inbound frames are parsed on a
/// background task and handed out through the event receiver returned by
/// `open`; unparseable frames are logged and dropped without touching the
/// connection.
pub struct TransportChannel {
    wire: Arc<dyn WireStream>,
    session_id: u64,
    deliberate: Arc<AtomicBool>,
}

impl TransportChannel {
    /// Dial `endpoint` and await the backend's `connected` confirmation.
    ///
    /// `session_id` is set on reconnect so the backend resumes the same
    /// session rather than assigning a fresh one.
    pub async fn open(
        dialer: &dyn WireDialer,
        endpoint: &str,
        session_id: Option<u64>,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), TransportError> {
        let url = match session_id {
            Some(id) => format!("{endpoint}?sessionId={id}"),
            None => endpoint.to_string(),
        };

        info!("Connecting to {url}");
        let (wire, mut wire_rx) = dialer.dial(&url).await?;

        let confirmed =
            match tokio::time::timeout(connect_timeout, await_connected(&mut wire_rx)).await {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    wire.close().await;
                    return Err(TransportError::ConnectTimeout);
                }
            };

        if let Some(requested) = session_id {
            if requested != confirmed {
                warn!("Requested session {requested} but backend confirmed {confirmed}");
            }
        }

        info!("Session {confirmed} confirmed by backend");

        let deliberate = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel(100);
        tokio::spawn(read_loop(wire_rx, events_tx, Arc::clone(&deliberate)));

        Ok((
            Self {
                wire,
                session_id: confirmed,
                deliberate,
            },
            events_rx,
        ))
    }

    /// The backend-assigned session id this connection is serving.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Encode a batch as one binary frame and send it.
    ///
    /// Each chunk is decoded from its base64 transport encoding; a chunk
    /// that fails to decode, or whose decoded size disagrees with its
    /// reported length, is skipped without affecting the rest of the
    /// batch. Returns the number of chunks that made it onto the wire.
    pub async fn send_audio(&self, batch: &AudioBatch) -> Result<usize, TransportError> {
        let mut decoded: Vec<Vec<u8>> = Vec::with_capacity(batch.len());
        let mut total_bytes = 0usize;

        for chunk in batch.chunks() {
            match base64::engine::general_purpose::STANDARD.decode(&chunk.payload) {
                Ok(bytes) => {
                    if bytes.len() != chunk.length {
                        warn!(
                            "Chunk length mismatch (reported {}, decoded {}), skipping",
                            chunk.length,
                            bytes.len()
                        );
                        continue;
                    }
                    total_bytes += bytes.len();
                    decoded.push(bytes);
                }
                Err(e) => {
                    warn!("Failed to decode audio chunk, skipping: {e}");
                }
            }
        }

        if decoded.is_empty() {
            warn!("No valid audio data to send");
            return Ok(0);
        }

        let mut frame = Vec::with_capacity(total_bytes);
        for bytes in &decoded {
            frame.extend_from_slice(bytes);
        }

        let sent = decoded.len();
        debug!("Sending {total_bytes} bytes of audio ({sent} chunks)");

        match self.wire.send_binary(frame).await {
            Ok(()) => Ok(sent),
            Err(TransportError::NotOpen) => {
                warn!("Channel not open, cannot send audio");
                Err(TransportError::NotOpen)
            }
            Err(e) => Err(e),
        }
    }

    /// Deliberately terminate the connection.
    ///
    /// The resulting closed event carries `deliberate = true`, which is
    /// what suppresses reconnection.
    pub async fn close(&self) {
        self.deliberate.store(true, Ordering::SeqCst);
        self.wire.close().await;
    }
}

/// Consume wire events until the backend confirms the session.
async fn await_connected(wire_rx: &mut mpsc::Receiver<WireEvent>) -> Result<u64, TransportError> {
    loop {
        match wire_rx.recv().await {
            Some(WireEvent::Text(payload)) => match InboundMessage::parse(&payload) {
                Ok(InboundMessage::Connected {
                    session_id,
                    message,
                }) => {
                    debug!("Backend says: {message}");
                    return Ok(session_id);
                }
                Ok(other) => {
                    warn!("Ignoring message before session confirmation: {other:?}");
                }
                Err(e) => {
                    warn!("Failed to parse message: {e}");
                }
            },
            Some(WireEvent::Closed { reason }) => {
                return Err(TransportError::ClosedBeforeConnected(reason));
            }
            None => {
                return Err(TransportError::ClosedBeforeConnected(
                    "wire event stream ended".to_string(),
                ));
            }
        }
    }
}

async fn read_loop(
    mut wire_rx: mpsc::Receiver<WireEvent>,
    events_tx: mpsc::Sender<ChannelEvent>,
    deliberate: Arc<AtomicBool>,
) {
    while let Some(event) = wire_rx.recv().await {
        match event {
            WireEvent::Text(payload) => match InboundMessage::parse(&payload) {
                Ok(message) => {
                    if events_tx.send(ChannelEvent::Message(message)).await.is_err() {
                        debug!("Channel event receiver dropped, closing read loop");
                        return;
                    }
                }
                Err(e) => {
                    // Discarded; a bad frame never takes the channel down
                    warn!("Failed to parse message: {e}");
                }
            },
            WireEvent::Closed { reason } => {
                let deliberate = deliberate.load(Ordering::SeqCst);
                info!("Channel closed (deliberate={deliberate}): {reason}");
                let _ = events_tx
                    .send(ChannelEvent::Closed { reason, deliberate })
                    .await;
                return;
            }
        }
    }

    // Wire task ended without a close event; report what we know
    let _ = events_tx
        .send(ChannelEvent::Closed {
            reason: "wire event stream ended".to_string(),
            deliberate: deliberate.load(Ordering::SeqCst),
        })
        .await;
}
