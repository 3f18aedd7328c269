use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::error::SessionError;
use super::stats::{SessionStats, TranscriptSegment};
use crate::audio::{AudioBatch, AudioCapture, AudioChunk, ChunkAggregator};
use crate::transport::{
    ChannelEvent, InboundMessage, ReconnectSupervisor, TransportChannel, TransportError, WireDialer,
};

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Stopping,
    Closed,
}

enum Command {
    Stop { done: oneshot::Sender<()> },
}

/// Top-level session engine.
///
/// Owns the capture → aggregator → channel pipeline and the inbound
/// fan-out. One controller runs at most one session at a time; a second
/// `start_session` while one is connecting or active fails fast instead
/// of opening a second connection. Both the capture source and the wire
/// dialer are injected, so independent controllers can run side by side
/// in tests.
pub struct SessionController {
    config: SessionConfig,
    capture: Arc<Mutex<Box<dyn AudioCapture>>>,
    dialer: Arc<dyn WireDialer>,

    state: Arc<Mutex<SessionState>>,
    session_id: Arc<Mutex<Option<u64>>>,
    started_at: Mutex<Option<chrono::DateTime<Utc>>>,
    chunks_sent: Arc<AtomicUsize>,
    segments: Arc<Mutex<Vec<TranscriptSegment>>>,

    transcript_tx: broadcast::Sender<TranscriptSegment>,
    error_tx: broadcast::Sender<SessionError>,

    command_tx: Mutex<Option<mpsc::Sender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        capture: Box<dyn AudioCapture>,
        dialer: Arc<dyn WireDialer>,
    ) -> Self {
        let (transcript_tx, _) = broadcast::channel(256);
        let (error_tx, _) = broadcast::channel(16);

        Self {
            config,
            capture: Arc::new(Mutex::new(capture)),
            dialer,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            session_id: Arc::new(Mutex::new(None)),
            started_at: Mutex::new(None),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
            segments: Arc::new(Mutex::new(Vec::new())),
            transcript_tx,
            error_tx,
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start a new session.
    ///
    /// Requests capture permission, opens the channel, starts the chunk
    /// source and resolves with the backend-assigned session id once the
    /// session is active. A failed initial connect is surfaced to the
    /// caller and never retried automatically.
    pub async fn start_session(&self) -> Result<u64, SessionError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Idle | SessionState::Closed => *state = SessionState::Connecting,
                current => {
                    warn!("start_session rejected, session is {current:?}");
                    return Err(SessionError::SessionInProgress);
                }
            }
        }

        match self.connect_and_spawn().await {
            Ok(session_id) => Ok(session_id),
            Err(e) => {
                *self.state.lock().await = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn connect_and_spawn(&self) -> Result<u64, SessionError> {
        {
            let capture = self.capture.lock().await;
            capture.request_permission().await?;
        }

        let (channel, channel_events) = TransportChannel::open(
            self.dialer.as_ref(),
            &self.config.endpoint,
            None,
            self.config.connect_timeout,
        )
        .await
        .map_err(|e| SessionError::ConnectFailure(e.to_string()))?;

        let session_id = channel.session_id();

        let chunk_rx = {
            let mut capture = self.capture.lock().await;
            match capture.start().await {
                Ok(rx) => rx,
                Err(e) => {
                    channel.close().await;
                    return Err(e.into());
                }
            }
        };

        info!("Session {session_id} started");

        *self.session_id.lock().await = Some(session_id);
        *self.started_at.lock().await = Some(Utc::now());
        self.chunks_sent.store(0, Ordering::SeqCst);
        self.segments.lock().await.clear();

        let (command_tx, command_rx) = mpsc::channel(4);
        *self.command_tx.lock().await = Some(command_tx);

        let task = SessionTask {
            session_id,
            aggregator: ChunkAggregator::new(self.config.batch_size),
            supervisor: Arc::new(ReconnectSupervisor::new(
                Arc::clone(&self.dialer),
                self.config.endpoint.clone(),
                self.config.connect_timeout,
                self.config.reconnect.clone(),
            )),
            capture: Arc::clone(&self.capture),
            state: Arc::clone(&self.state),
            session_slot: Arc::clone(&self.session_id),
            chunks_sent: Arc::clone(&self.chunks_sent),
            segments: Arc::clone(&self.segments),
            transcript_tx: self.transcript_tx.clone(),
            error_tx: self.error_tx.clone(),
        };

        *self.state.lock().await = SessionState::Active;

        let handle = tokio::spawn(task.run(channel, channel_events, chunk_rx, command_rx));
        *self.task.lock().await = Some(handle);

        Ok(session_id)
    }

    /// Stop the running session: unsubscribe capture, flush the partial
    /// batch, close the channel deliberately. A pending reconnect delay
    /// is cancelled before it fires. Bounded by the cleanup timeout.
    pub async fn stop_session(&self) -> Result<(), SessionError> {
        let command_tx = self.command_tx.lock().await.take();
        let Some(command_tx) = command_tx else {
            warn!("stop_session with no session running");
            return Ok(());
        };

        let (done_tx, done_rx) = oneshot::channel();
        if command_tx.send(Command::Stop { done: done_tx }).await.is_err() {
            // The task already tore itself down (reconnect exhausted)
            debug!("Session task already finished");
            self.join_task().await;
            return Ok(());
        }

        match tokio::time::timeout(self.config.cleanup_timeout, done_rx).await {
            Ok(_) => {
                self.join_task().await;
                Ok(())
            }
            Err(_) => {
                warn!("Session cleanup timed out, aborting session task");
                if let Some(task) = self.task.lock().await.take() {
                    task.abort();
                }
                *self.session_id.lock().await = None;
                *self.state.lock().await = SessionState::Closed;
                Err(SessionError::CleanupTimeout)
            }
        }
    }

    async fn join_task(&self) {
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Session task panicked: {e}");
                }
            }
        }
    }

    /// Subscribe to transcript segments, forwarded in receipt order.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptSegment> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to server-reported and terminal session errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SessionError> {
        self.error_tx.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn session_id(&self) -> Option<u64> {
        *self.session_id.lock().await
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let started_at = *self.started_at.lock().await;
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            state: *self.state.lock().await,
            session_id: *self.session_id.lock().await,
            started_at,
            duration_secs,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            transcript_segments: self.segments.lock().await.len(),
        }
    }

    /// Get the transcript accumulated so far
    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        self.segments.lock().await.clone()
    }
}

enum ReconnectOutcome {
    Reconnected(TransportChannel, mpsc::Receiver<ChannelEvent>),
    Stopped(Option<oneshot::Sender<()>>),
    Exhausted,
}

/// The per-session event loop, spawned by `start_session`.
struct SessionTask {
    session_id: u64,
    aggregator: ChunkAggregator,
    supervisor: Arc<ReconnectSupervisor>,
    capture: Arc<Mutex<Box<dyn AudioCapture>>>,
    state: Arc<Mutex<SessionState>>,
    session_slot: Arc<Mutex<Option<u64>>>,
    chunks_sent: Arc<AtomicUsize>,
    segments: Arc<Mutex<Vec<TranscriptSegment>>>,
    transcript_tx: broadcast::Sender<TranscriptSegment>,
    error_tx: broadcast::Sender<SessionError>,
}

impl SessionTask {
    async fn run(
        mut self,
        mut channel: TransportChannel,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut chunk_rx: mpsc::Receiver<AudioChunk>,
        mut command_rx: mpsc::Receiver<Command>,
    ) {
        let mut capture_open = true;

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let done = match command {
                        Some(Command::Stop { done }) => Some(done),
                        // Controller dropped; clean up the same way
                        None => None,
                    };
                    self.shutdown(Some(&channel), &mut chunk_rx).await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                }

                chunk = chunk_rx.recv(), if capture_open => {
                    match chunk {
                        Some(chunk) => {
                            if let Some(batch) = self.aggregator.push(chunk) {
                                self.send_batch(&channel, &batch).await;
                            }
                        }
                        None => {
                            // Source finished on its own (e.g. file replay
                            // ran out); transcripts for audio already sent
                            // keep flowing until stop_session.
                            debug!("Chunk source closed");
                            capture_open = false;
                        }
                    }
                }

                event = events.recv() => {
                    match event {
                        Some(ChannelEvent::Message(message)) => {
                            self.handle_message(message).await;
                        }
                        Some(ChannelEvent::Closed { deliberate: true, .. }) => {
                            // Deliberate closes are driven by the stop path
                            debug!("Channel closed deliberately");
                            return;
                        }
                        Some(ChannelEvent::Closed { reason, deliberate: false }) => {
                            warn!("Connection lost while active: {reason}");
                            match self.reconnect(&mut command_rx, &mut chunk_rx).await {
                                ReconnectOutcome::Reconnected(new_channel, new_events) => {
                                    channel = new_channel;
                                    events = new_events;
                                }
                                ReconnectOutcome::Stopped(done) => {
                                    if let Some(done) = done {
                                        let _ = done.send(());
                                    }
                                    return;
                                }
                                ReconnectOutcome::Exhausted => return,
                            }
                        }
                        None => {
                            warn!("Channel event stream ended unexpectedly");
                            self.teardown_after_failure().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One bounded reconnect cycle, cancellable by a stop command.
    async fn reconnect(
        &mut self,
        command_rx: &mut mpsc::Receiver<Command>,
        chunk_rx: &mut mpsc::Receiver<AudioChunk>,
    ) -> ReconnectOutcome {
        let supervisor = Arc::clone(&self.supervisor);
        let reestablish = supervisor.reestablish(self.session_id);
        tokio::pin!(reestablish);

        tokio::select! {
            command = command_rx.recv() => {
                // stop_session cancels the pending retry before it fires
                info!("Stop requested during reconnect, cancelling");
                let done = match command {
                    Some(Command::Stop { done }) => Some(done),
                    None => None,
                };
                self.shutdown(None, chunk_rx).await;
                ReconnectOutcome::Stopped(done)
            }

            result = &mut reestablish => match result {
                Ok((channel, events)) => {
                    if channel.session_id() != self.session_id {
                        // id is immutable once assigned; keep ours
                        warn!(
                            "Backend confirmed session {} on reconnect, keeping {}",
                            channel.session_id(),
                            self.session_id
                        );
                    }
                    info!("Session {} resumed", self.session_id);
                    ReconnectOutcome::Reconnected(channel, events)
                }
                Err(e) => {
                    let attempts = match &e {
                        TransportError::ReconnectExhausted { attempts } => *attempts,
                        _ => self.supervisor.policy().max_attempts,
                    };
                    error!("Giving up on session {}: {e}", self.session_id);
                    let _ = self
                        .error_tx
                        .send(SessionError::ReconnectExhausted { attempts });
                    self.teardown_after_failure().await;
                    ReconnectOutcome::Exhausted
                }
            }
        }
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Transcript {
                id,
                content,
                timestamp,
                speaker_id,
            } => {
                debug!("Transcript received: {content}");
                let segment = TranscriptSegment {
                    id,
                    content,
                    timestamp,
                    speaker_id,
                    received_at: Utc::now(),
                };
                self.segments.lock().await.push(segment.clone());
                // No live subscriber is not an error
                let _ = self.transcript_tx.send(segment);
            }
            InboundMessage::Error { message } => {
                warn!("Server error: {message}");
                let _ = self.error_tx.send(SessionError::Server(message));
            }
            InboundMessage::Connected { session_id, .. } => {
                // open() consumes the confirmation; anything later is noise
                debug!("Ignoring stray connected message for session {session_id}");
            }
        }
    }

    async fn send_batch(&self, channel: &TransportChannel, batch: &AudioBatch) {
        match channel.send_audio(batch).await {
            Ok(sent) => {
                self.chunks_sent.fetch_add(sent, Ordering::SeqCst);
            }
            Err(e) => {
                // A lost connection surfaces through the event stream;
                // the batch itself is best-effort
                warn!("Failed to send audio batch: {e}");
            }
        }
    }

    /// Deliberate stop: capture off, buffered audio flushed, channel
    /// closed. `channel` is `None` when stopping during a reconnect, in
    /// which case buffered audio has nowhere to go.
    async fn shutdown(
        &mut self,
        channel: Option<&TransportChannel>,
        chunk_rx: &mut mpsc::Receiver<AudioChunk>,
    ) {
        *self.state.lock().await = SessionState::Stopping;
        info!("Stopping session {}", self.session_id);

        {
            let mut capture = self.capture.lock().await;
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture: {e}");
            }
        }

        // Pull in chunks already delivered, then force out the remainder
        let mut pending: Vec<AudioBatch> = Vec::new();
        while let Ok(chunk) = chunk_rx.try_recv() {
            if let Some(batch) = self.aggregator.push(chunk) {
                pending.push(batch);
            }
        }
        if let Some(batch) = self.aggregator.flush() {
            pending.push(batch);
        }

        match channel {
            Some(channel) => {
                for batch in &pending {
                    self.send_batch(channel, batch).await;
                }
                channel.close().await;
            }
            None => {
                let dropped: usize = pending.iter().map(|b| b.len()).sum();
                if dropped > 0 {
                    warn!("Discarding {dropped} buffered chunks, connection is down");
                }
            }
        }

        *self.session_slot.lock().await = None;
        *self.state.lock().await = SessionState::Closed;
        info!("Session stopped");
    }

    /// Unrecoverable transport failure: capture off, identity discarded,
    /// back to `Idle`. Collected transcripts stay readable until the next
    /// session starts.
    async fn teardown_after_failure(&mut self) {
        {
            let mut capture = self.capture.lock().await;
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture: {e}");
            }
        }

        if self.aggregator.pending() > 0 {
            warn!(
                "Discarding {} buffered chunks, connection is down",
                self.aggregator.pending()
            );
        }

        *self.session_slot.lock().await = None;
        *self.state.lock().await = SessionState::Idle;
    }
}
