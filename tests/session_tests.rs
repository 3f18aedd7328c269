// End-to-end tests for the session engine, run against a scripted
// backend: a fake wire dialer the tests fully control and a capture
// source fed by hand. Reconnect timing runs on the paused tokio clock,
// so the fixed-delay policy is exercised without real waiting.

use std::time::Duration;

use base64::Engine;
use meeting_stream::{ReconnectPolicy, SessionConfig, SessionController, SessionError, SessionState};
use tokio::sync::broadcast::error::TryRecvError;

use support::{chunk, DialOutcome, MockCapture, ScriptedDialer};

fn test_config() -> SessionConfig {
    SessionConfig {
        endpoint: "ws://backend.test/ws/audio-stream".to_string(),
        batch_size: 3,
        connect_timeout: Duration::from_secs(5),
        cleanup_timeout: Duration::from_secs(5),
        reconnect: ReconnectPolicy {
            max_attempts: 5,
            retry_delay: Duration::from_millis(3000),
        },
    }
}

/// Poll until `cond` holds; generous budget so paused-clock tests can
/// burn through multiple 3s retry delays.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_start_session_resolves_backend_id() {
    let dialer = ScriptedDialer::accepting(42);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    let session_id = controller.start_session().await.unwrap();

    assert_eq!(session_id, 42);
    assert_eq!(controller.state().await, SessionState::Active);
    assert_eq!(controller.session_id().await, Some(42));

    // The first connect never claims a previous session
    assert!(!dialer.dialed_urls()[0].contains("sessionId"));
}

#[tokio::test]
async fn test_second_start_fails_fast() {
    let dialer = ScriptedDialer::accepting(1);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    let err = controller.start_session().await.unwrap_err();

    assert_eq!(err, SessionError::SessionInProgress);
    // The first session is untouched
    assert_eq!(controller.state().await, SessionState::Active);
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn test_permission_denied_surfaces_before_connecting() {
    let dialer = ScriptedDialer::accepting(1);
    let (capture, _chunk_tx) = MockCapture::denying();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    let err = controller.start_session().await.unwrap_err();

    assert!(matches!(err, SessionError::PermissionDenied(_)));
    assert_eq!(controller.state().await, SessionState::Idle);
    assert_eq!(dialer.dial_count(), 0, "no connection attempt without permission");
}

#[tokio::test(start_paused = true)]
async fn test_initial_connect_failure_is_not_retried() {
    // Empty script: every dial is refused
    let dialer = ScriptedDialer::scripted(vec![]);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    let err = controller.start_session().await.unwrap_err();

    assert!(matches!(err, SessionError::ConnectFailure(_)));
    assert_eq!(controller.state().await, SessionState::Idle);

    // No automatic retry, even as time passes
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn test_transcripts_forwarded_in_receipt_order() {
    let dialer = ScriptedDialer::accepting(3);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());
    let mut transcripts = controller.subscribe_transcripts();

    controller.start_session().await.unwrap();
    let wire = dialer.connection(0);

    wire.push_transcript(1, "good morning everyone").await;
    wire.push_transcript(2, "let's review the agenda").await;
    wire.push_transcript(3, "first item").await;

    for (id, content) in [
        (1, "good morning everyone"),
        (2, "let's review the agenda"),
        (3, "first item"),
    ] {
        let segment = transcripts.recv().await.unwrap();
        assert_eq!(segment.id, id);
        assert_eq!(segment.content, content);
    }

    // Segments also accumulate on the controller
    let stored = controller.transcript().await;
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].content, "good morning everyone");
    assert_eq!(controller.stats().await.transcript_segments, 3);
}

#[tokio::test]
async fn test_server_error_forwarded_without_ending_session() {
    let dialer = ScriptedDialer::accepting(3);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());
    let mut transcripts = controller.subscribe_transcripts();
    let mut errors = controller.subscribe_errors();

    controller.start_session().await.unwrap();
    let wire = dialer.connection(0);

    wire.push_server_error("transcription model overloaded").await;

    assert_eq!(
        errors.recv().await.unwrap(),
        SessionError::Server("transcription model overloaded".to_string())
    );
    assert_eq!(controller.state().await, SessionState::Active);

    // The session keeps flowing afterwards
    wire.push_transcript(9, "still here").await;
    assert_eq!(transcripts.recv().await.unwrap().content, "still here");
}

#[tokio::test]
async fn test_chunks_batched_into_single_frames() {
    let dialer = ScriptedDialer::accepting(5);
    let (capture, chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();

    chunk_tx.send(chunk(b"aaaa")).await.unwrap();
    chunk_tx.send(chunk(b"bbbb")).await.unwrap();
    chunk_tx.send(chunk(b"cccc")).await.unwrap();

    let wire = dialer.connection(0);
    wait_until(|| wire.sent_frames().len() == 1).await;
    assert_eq!(wire.sent_frames()[0], b"aaaabbbbcccc".to_vec());

    // A partial batch is flushed by stop_session
    chunk_tx.send(chunk(b"dd")).await.unwrap();
    controller.stop_session().await.unwrap();

    let frames = wire.sent_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], b"dd".to_vec());
    assert_eq!(controller.stats().await.chunks_sent, 4);
    assert_eq!(controller.state().await, SessionState::Closed);
}

#[tokio::test]
async fn test_undecodable_chunks_skipped_not_fatal() {
    let dialer = ScriptedDialer::accepting(5);
    let (capture, chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    let wire = dialer.connection(0);

    // Middle chunk is not base64; the valid neighbours survive
    chunk_tx.send(chunk(b"head")).await.unwrap();
    chunk_tx
        .send(meeting_stream::AudioChunk::new("%%% not base64 %%%", 4))
        .await
        .unwrap();
    chunk_tx.send(chunk(b"tail")).await.unwrap();

    wait_until(|| wire.sent_frames().len() == 1).await;
    assert_eq!(wire.sent_frames()[0], b"headtail".to_vec());
    assert_eq!(controller.stats().await.chunks_sent, 2);

    // A chunk whose reported length disagrees with its payload is also
    // skipped
    chunk_tx
        .send(meeting_stream::AudioChunk::new(
            base64::engine::general_purpose::STANDARD.encode(b"wxyz"),
            3,
        ))
        .await
        .unwrap();
    chunk_tx.send(chunk(b"ok1")).await.unwrap();
    chunk_tx.send(chunk(b"ok2")).await.unwrap();

    wait_until(|| wire.sent_frames().len() == 2).await;
    assert_eq!(wire.sent_frames()[1], b"ok1ok2".to_vec());

    assert_eq!(controller.state().await, SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_all_invalid_batch_sends_no_frame() {
    let dialer = ScriptedDialer::accepting(5);
    let (capture, chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    let wire = dialer.connection(0);

    for _ in 0..3 {
        chunk_tx
            .send(meeting_stream::AudioChunk::new("!!!", 2))
            .await
            .unwrap();
    }

    // Give the pipeline time to (not) act
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(wire.sent_frames().is_empty());
    assert_eq!(controller.stats().await.chunks_sent, 0);
    assert_eq!(controller.state().await, SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_deliberate_stop_never_reconnects() {
    let dialer = ScriptedDialer::accepting(8);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    controller.stop_session().await.unwrap();

    assert_eq!(controller.state().await, SessionState::Closed);
    assert_eq!(controller.session_id().await, None);
    assert!(!dialer.connection(0).is_open());

    // Plenty of virtual time for a stray reconnect timer to fire
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reuses_session_id_and_stays_active() {
    let dialer = ScriptedDialer::accepting(7);
    let (capture, chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());
    let mut errors = controller.subscribe_errors();

    assert_eq!(controller.start_session().await.unwrap(), 7);

    // Three spontaneous drops, each recovered on the first retry
    for i in 0..3 {
        dialer.connection(i).drop_connection("network reset").await;
        let expected = i + 2;
        wait_until(|| dialer.dial_count() == expected).await;
    }

    // Every reconnect claimed the original session
    let urls = dialer.dialed_urls();
    for url in &urls[1..] {
        assert!(url.contains("sessionId=7"), "reconnect url was {url}");
    }

    // Invisible to the caller: still active, same id, no error observed
    assert_eq!(controller.state().await, SessionState::Active);
    assert_eq!(controller.session_id().await, Some(7));
    assert!(matches!(errors.try_recv(), Err(TryRecvError::Empty)));

    // Audio flows over the replacement connection
    for payload in [b"one".as_slice(), b"two", b"tre"] {
        chunk_tx.send(chunk(payload)).await.unwrap();
    }
    let wire = dialer.connection(3);
    wait_until(|| wire.sent_frames().len() == 1).await;
    assert_eq!(wire.sent_frames()[0], b"onetwotre".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_reports_once_and_goes_idle() {
    // One accepted connect, then the backend is gone for good
    let dialer = ScriptedDialer::scripted(vec![DialOutcome::Accept { session_id: 9 }]);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());
    let mut errors = controller.subscribe_errors();

    controller.start_session().await.unwrap();
    dialer.connection(0).drop_connection("backend crashed").await;

    assert_eq!(
        errors.recv().await.unwrap(),
        SessionError::ReconnectExhausted { attempts: 5 }
    );

    wait_until_state(&controller, SessionState::Idle).await;
    assert_eq!(controller.session_id().await, None);

    // Initial connect + 5 failed retries, and exactly one notification
    assert_eq!(dialer.dial_count(), 6);
    assert!(matches!(errors.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_cancels_pending_retry() {
    let dialer = ScriptedDialer::accepting(4);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    dialer.connection(0).drop_connection("network reset").await;

    // Let the closed event reach the session task so the retry timer is
    // actually pending
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    controller.stop_session().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Closed);
    assert_eq!(dialer.dial_count(), 1, "no dial may happen after stop");

    // The cancelled timer never fires
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn test_stop_without_session_is_harmless() {
    let dialer = ScriptedDialer::accepting(1);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.stop_session().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Idle);
    assert_eq!(dialer.dial_count(), 0);
}

#[tokio::test]
async fn test_restart_after_stop_gets_fresh_identity() {
    let dialer = ScriptedDialer::accepting(100);
    let (capture, _chunk_tx) = MockCapture::new();
    let controller =
        SessionController::new(test_config(), capture, dialer.clone());

    controller.start_session().await.unwrap();
    controller.stop_session().await.unwrap();

    controller.start_session().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Active);

    // The second connect asks for a new session, not the old one
    let urls = dialer.dialed_urls();
    assert_eq!(urls.len(), 2);
    assert!(!urls[1].contains("sessionId"));
}

async fn wait_until_state(controller: &SessionController, expected: SessionState) {
    for _ in 0..2000 {
        if controller.state().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("controller never reached {expected:?}");
}

mod support {
    use async_trait::async_trait;
    use base64::Engine;
    use meeting_stream::{
        AudioCapture, AudioChunk, CaptureError, TransportError, WireDialer, WireEvent, WireStream,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    pub fn chunk(data: &[u8]) -> AudioChunk {
        AudioChunk::new(
            base64::engine::general_purpose::STANDARD.encode(data),
            data.len(),
        )
    }

    /// What the fake backend does with one dial attempt.
    #[derive(Debug, Clone, Copy)]
    pub enum DialOutcome {
        Accept { session_id: u64 },
        Refuse,
    }

    /// A `WireDialer` the test script controls completely. Records every
    /// dialed url and keeps handles to the connections it produced.
    pub struct ScriptedDialer {
        script: Mutex<VecDeque<DialOutcome>>,
        default_accept: Option<u64>,
        dialed: Mutex<Vec<String>>,
        connections: Mutex<Vec<Arc<FakeWire>>>,
    }

    impl ScriptedDialer {
        /// Every dial succeeds, confirming `session_id`.
        pub fn accepting(session_id: u64) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                default_accept: Some(session_id),
                dialed: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
            })
        }

        /// Follows `script`, refusing every dial once it runs out.
        pub fn scripted(script: Vec<DialOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                default_accept: None,
                dialed: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
            })
        }

        pub fn dial_count(&self) -> usize {
            self.dialed.lock().unwrap().len()
        }

        pub fn dialed_urls(&self) -> Vec<String> {
            self.dialed.lock().unwrap().clone()
        }

        pub fn connection(&self, index: usize) -> Arc<FakeWire> {
            Arc::clone(&self.connections.lock().unwrap()[index])
        }
    }

    #[async_trait]
    impl WireDialer for ScriptedDialer {
        async fn dial(
            &self,
            url: &str,
        ) -> Result<(Arc<dyn WireStream>, mpsc::Receiver<WireEvent>), TransportError> {
            self.dialed.lock().unwrap().push(url.to_string());

            let outcome = {
                let mut script = self.script.lock().unwrap();
                script.pop_front().unwrap_or(match self.default_accept {
                    Some(session_id) => DialOutcome::Accept { session_id },
                    None => DialOutcome::Refuse,
                })
            };

            match outcome {
                DialOutcome::Refuse => Err(TransportError::Dial {
                    url: url.to_string(),
                    source: anyhow::anyhow!("connection refused"),
                }),
                DialOutcome::Accept { session_id } => {
                    let (inbound_tx, inbound_rx) = mpsc::channel(64);

                    // The backend confirms the session as soon as the
                    // socket is up
                    inbound_tx
                        .send(WireEvent::Text(format!(
                            r#"{{"type":"connected","sessionId":{session_id},"message":"ok"}}"#
                        )))
                        .await
                        .expect("fresh channel accepts the confirmation");

                    let wire = Arc::new(FakeWire {
                        open: AtomicBool::new(true),
                        frames: Mutex::new(Vec::new()),
                        inbound: inbound_tx,
                    });
                    self.connections.lock().unwrap().push(Arc::clone(&wire));

                    Ok((wire, inbound_rx))
                }
            }
        }
    }

    /// One fake connection: captures outbound binary frames and lets the
    /// test inject downlink traffic or kill the wire.
    pub struct FakeWire {
        open: AtomicBool,
        frames: Mutex<Vec<Vec<u8>>>,
        inbound: mpsc::Sender<WireEvent>,
    }

    impl FakeWire {
        pub fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        pub fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }

        pub async fn push_text(&self, payload: String) {
            let _ = self.inbound.send(WireEvent::Text(payload)).await;
        }

        pub async fn push_transcript(&self, id: u64, content: &str) {
            self.push_text(format!(
                r#"{{"type":"transcript","id":{id},"content":"{content}","timestamp":"2026-08-08T10:00:00","speakerId":null}}"#
            ))
            .await;
        }

        pub async fn push_server_error(&self, message: &str) {
            self.push_text(format!(r#"{{"type":"error","message":"{message}"}}"#))
                .await;
        }

        /// Kill the wire as if the network failed.
        pub async fn drop_connection(&self, reason: &str) {
            self.open.store(false, Ordering::SeqCst);
            let _ = self
                .inbound
                .send(WireEvent::Closed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    #[async_trait]
    impl WireStream for FakeWire {
        async fn send_binary(&self, frame: Vec<u8>) -> Result<(), TransportError> {
            if !self.open.load(Ordering::SeqCst) {
                return Err(TransportError::NotOpen);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn close(&self) {
            if self.open.swap(false, Ordering::SeqCst) {
                let _ = self
                    .inbound
                    .send(WireEvent::Closed {
                        reason: "closed by client".to_string(),
                    })
                    .await;
            }
        }
    }

    /// Capture source fed by hand through the returned sender.
    pub struct MockCapture {
        deny_permission: bool,
        chunks: Mutex<Option<mpsc::Receiver<AudioChunk>>>,
        capturing: AtomicBool,
    }

    impl MockCapture {
        pub fn new() -> (Box<MockCapture>, mpsc::Sender<AudioChunk>) {
            Self::build(false)
        }

        pub fn denying() -> (Box<MockCapture>, mpsc::Sender<AudioChunk>) {
            Self::build(true)
        }

        fn build(deny_permission: bool) -> (Box<MockCapture>, mpsc::Sender<AudioChunk>) {
            let (tx, rx) = mpsc::channel(64);
            (
                Box::new(Self {
                    deny_permission,
                    chunks: Mutex::new(Some(rx)),
                    capturing: AtomicBool::new(false),
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl AudioCapture for MockCapture {
        async fn request_permission(&self) -> Result<(), CaptureError> {
            if self.deny_permission {
                Err(CaptureError::PermissionDenied(
                    "microphone access refused".to_string(),
                ))
            } else {
                Ok(())
            }
        }

        async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
            // The hand-fed receiver serves the first session; a restart
            // gets a channel with no producer (immediately exhausted),
            // which is enough for restart tests.
            let rx = self.chunks.lock().unwrap().take().unwrap_or_else(|| {
                let (_tx, rx) = mpsc::channel(1);
                rx
            });
            self.capturing.store(true, Ordering::SeqCst);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<(), CaptureError> {
            self.capturing.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_capturing(&self) -> bool {
            self.capturing.load(Ordering::SeqCst)
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
