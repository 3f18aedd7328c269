use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::error::TransportError;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// An event produced by the raw wire.
#[derive(Debug, Clone)]
pub enum WireEvent {
    /// One inbound text frame
    Text(String),
    /// The wire is gone; the transport's stated reason, if any
    Closed { reason: String },
}

/// One live duplex connection: binary frames out, `WireEvent`s in.
#[async_trait]
pub trait WireStream: Send + Sync {
    async fn send_binary(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&self);
}

/// Dials new wire connections.
///
/// `TransportChannel` and `ReconnectSupervisor` only ever see this trait,
/// so tests can substitute a scripted backend for the real WebSocket.
#[async_trait]
pub trait WireDialer: Send + Sync {
    async fn dial(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn WireStream>, mpsc::Receiver<WireEvent>), TransportError>;
}

/// Production dialer backed by tokio-tungstenite.
pub struct WebSocketDialer;

struct WebSocketWire {
    sink: Arc<Mutex<Option<WsSink>>>,
}

#[async_trait]
impl WireStream for WebSocketWire {
    async fn send_binary(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotOpen)?;

        debug!("--> Sending binary frame: {} bytes", frame.len());
        sink.send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            // Start the close handshake; the read pump observes the peer's
            // close and reports the wire as gone.
            let _ = sink.send(Message::Close(None)).await;
        }
    }
}

#[async_trait]
impl WireDialer for WebSocketDialer {
    async fn dial(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn WireStream>, mpsc::Receiver<WireEvent>), TransportError> {
        info!("Dialing {url}");

        let (ws, _response) = connect_async(url).await.map_err(|e| TransportError::Dial {
            url: url.to_string(),
            source: e.into(),
        })?;

        let (sink, stream) = ws.split();
        let (events_tx, events_rx) = mpsc::channel(100);

        tokio::spawn(read_pump(stream, events_tx));

        let wire = WebSocketWire {
            sink: Arc::new(Mutex::new(Some(sink))),
        };

        Ok((Arc::new(wire), events_rx))
    }
}

async fn read_pump(mut stream: WsStream, events_tx: mpsc::Sender<WireEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("<-- Received text frame: {} bytes", text.len());
                if events_tx.send(WireEvent::Text(text)).await.is_err() {
                    warn!("Wire event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("Received close frame");
                break frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => {
                // Downlink is text-only; pings are answered by the library
                debug!("Ignoring non-text frame");
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };

    let _ = events_tx.send(WireEvent::Closed { reason }).await;
}
