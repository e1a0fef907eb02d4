use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::ChatError;
use crate::message::{Message, Transcript};
use crate::submit::{
    AbortHandle, ErrorHandler, SubmitOutcome, SubmitStream, SubmitTask, run_submission,
};
use crate::transport::{AgentTransport, SubmitRequest};

pub(crate) const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 128;
pub(crate) const DEFAULT_USER_ID: &str = "anonymous";

/// Configuration used to create a `ChatSession`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Conversation thread the session is bound to.
    pub thread_id: String,
    /// Sent with every submission; defaults to the thread id.
    pub session_id: String,
    pub user_id: String,
    /// Size of the bounded per-submission event channel.
    pub stream_buffer_capacity: usize,
}

impl SessionConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        let thread_id = thread_id.into();
        Self {
            session_id: thread_id.clone(),
            thread_id,
            user_id: DEFAULT_USER_ID.to_string(),
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
        }
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.thread_id.trim().is_empty() {
            return Err(ChatError::Validation("thread id must not be empty".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Validation(
                "stream_buffer_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

struct InFlight {
    abort: AbortHandle,
    task: JoinHandle<()>,
}

struct SessionInner {
    transport: Arc<dyn AgentTransport>,
    config: SessionConfig,
    on_error: Option<ErrorHandler>,
    live: Arc<watch::Sender<Transcript>>,
    submit_gate: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<InFlight>>,
}

impl SessionInner {
    fn in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One conversation thread with at most one in-flight stream.
///
/// Starting a submission cancels and awaits the previous one first, so
/// snapshots from two submissions never interleave.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub(crate) fn new(
        transport: Arc<dyn AgentTransport>,
        config: SessionConfig,
        on_error: Option<ErrorHandler>,
    ) -> Self {
        let (live, _rx) = watch::channel(Transcript::new());
        Self {
            inner: Arc::new(SessionInner {
                transport,
                config,
                on_error,
                live: Arc::new(live),
                submit_gate: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn thread_id(&self) -> &str {
        &self.inner.config.thread_id
    }

    /// Latest published transcript.
    pub fn transcript(&self) -> Transcript {
        self.inner.live.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.inner.live.subscribe()
    }

    /// Returns true while a submission task is running.
    pub fn is_streaming(&self) -> bool {
        self.inner
            .in_flight()
            .as_ref()
            .is_some_and(|in_flight| !in_flight.task.is_finished())
    }

    /// Submits `user_text` after `prior` and waits for the stream to settle.
    pub async fn submit(
        &self,
        prior: Vec<Message>,
        user_text: impl Into<String>,
    ) -> Result<SubmitOutcome, ChatError> {
        self.start_submit(prior, user_text).await?.finish().await
    }

    /// Starts a submission and returns its streaming handle.
    ///
    /// `prior` is the history the new human message is appended to, usually
    /// the current `transcript()` messages.
    pub async fn start_submit(
        &self,
        prior: Vec<Message>,
        user_text: impl Into<String>,
    ) -> Result<SubmitStream, ChatError> {
        let user_text = user_text.into();
        if user_text.trim().is_empty() {
            return Err(ChatError::Validation("message text must not be empty".into()));
        }

        let _gate = self.inner.submit_gate.lock().await;
        self.cancel_and_wait().await;

        let config = &self.inner.config;
        let mut messages = prior;
        messages.push(Message::human(user_text));
        let request = SubmitRequest {
            submission_id: uuid::Uuid::new_v4(),
            thread_id: config.thread_id.clone(),
            session_id: config.session_id.clone(),
            user_id: config.user_id.clone(),
            messages,
        };
        let submission_id = request.submission_id;

        let (events, rx) = mpsc::channel(config.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let abort_handle = AbortHandle::new();
        let task = SubmitTask {
            transport: self.inner.transport.clone(),
            request,
            live: self.inner.live.clone(),
            on_error: self.inner.on_error.clone(),
            events,
            final_tx,
        };
        let handle = tokio::spawn(run_submission(task, abort_handle.subscribe()));
        *self.inner.in_flight() = Some(InFlight {
            abort: abort_handle.clone(),
            task: handle,
        });
        info!(
            submission_id = %submission_id,
            thread_id = %config.thread_id,
            user_id = %config.user_id,
            "submission started"
        );

        Ok(SubmitStream {
            submission_id,
            thread_id: config.thread_id.clone(),
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        })
    }

    /// Cancels the in-flight submission, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(in_flight) = self.inner.in_flight().as_ref() {
            debug!(thread_id = %self.inner.config.thread_id, "cancelling in-flight submission");
            in_flight.abort.abort();
        }
    }

    async fn cancel_and_wait(&self) {
        let previous = self.inner.in_flight().take();
        let Some(previous) = previous else {
            return;
        };
        previous.abort.abort();
        if let Err(err) = previous.task.await {
            warn!(thread_id = %self.inner.config.thread_id, error = %err, "previous submission task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::chunk::{AgentNotice, Chunk};
    use crate::errors::{StreamFailure, TransportError};
    use crate::event::SessionEvent;
    use crate::message::{Role, ToolCallRef};
    use crate::transport::ByteStream;

    #[derive(Default)]
    struct FakeTransport {
        frames: Vec<String>,
        hang: bool,
        open_error: Option<TransportError>,
        fail_after_frames: Option<TransportError>,
        requests: Mutex<Vec<SubmitRequest>>,
    }

    impl FakeTransport {
        fn with_chunks(chunks: Vec<Chunk>) -> Self {
            let mut frames: Vec<String> = chunks
                .iter()
                .map(|chunk| chunk.to_frame().expect("frame"))
                .collect();
            frames.push(crate::chunk::DONE_FRAME.to_string());
            Self {
                frames,
                ..Self::default()
            }
        }

        fn hanging(chunks: Vec<Chunk>) -> Self {
            Self {
                frames: chunks
                    .iter()
                    .map(|chunk| chunk.to_frame().expect("frame"))
                    .collect(),
                hang: true,
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentTransport for FakeTransport {
        async fn open_stream(&self, request: SubmitRequest) -> Result<ByteStream, TransportError> {
            self.requests.lock().expect("lock").push(request);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let mut items: Vec<Result<bytes::Bytes, TransportError>> = self
                .frames
                .iter()
                .map(|frame| Ok(bytes::Bytes::from(frame.clone())))
                .collect();
            if let Some(err) = &self.fail_after_frames {
                items.push(Err(err.clone()));
            }
            let base = futures::stream::iter(items);
            if self.hang {
                Ok(Box::pin(futures::StreamExt::chain(
                    base,
                    futures::stream::pending(),
                )))
            } else {
                Ok(Box::pin(base))
            }
        }

        async fn fetch_history(&self, _thread_id: &str) -> Result<Vec<Message>, TransportError> {
            Ok(Vec::new())
        }
    }

    /// Byte source fed by the test one frame at a time.
    struct ScriptedTransport {
        feed: Mutex<Option<mpsc::UnboundedReceiver<bytes::Bytes>>>,
    }

    impl ScriptedTransport {
        fn new() -> (Self, mpsc::UnboundedSender<bytes::Bytes>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Self {
                feed: Mutex::new(Some(rx)),
            };
            (transport, tx)
        }
    }

    #[async_trait::async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn open_stream(&self, _request: SubmitRequest) -> Result<ByteStream, TransportError> {
            let rx = self
                .feed
                .lock()
                .expect("lock")
                .take()
                .ok_or_else(|| TransportError::request("scripted stream already opened"))?;
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|bytes| (Ok(bytes), rx))
            });
            Ok(Box::pin(stream))
        }

        async fn fetch_history(&self, _thread_id: &str) -> Result<Vec<Message>, TransportError> {
            Ok(Vec::new())
        }
    }

    fn frame(chunk: Chunk) -> String {
        chunk.to_frame().expect("frame")
    }

    fn session_with(transport: Arc<FakeTransport>) -> ChatSession {
        ChatSession::new(transport, SessionConfig::for_thread("thread-1"), None)
    }

    fn counting_handler() -> (ErrorHandler, Arc<Mutex<Vec<StreamFailure>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ErrorHandler = Arc::new(move |failure: &StreamFailure| {
            sink.lock().expect("lock").push(failure.clone());
        });
        (handler, seen)
    }

    fn texts(transcript: &Transcript) -> Vec<(Role, String)> {
        transcript
            .messages()
            .iter()
            .map(|message| (message.role, message.content.to_text()))
            .collect()
    }

    #[tokio::test]
    async fn submit_streams_tokens_and_tool_calls_into_transcript() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("Let me ").with_sequence_id(1),
            Chunk::token("check.").with_sequence_id(2),
            Chunk::message(Message::tool_calls(vec![ToolCallRef::new(
                "c1",
                "weather",
                serde_json::json!({"city": "Oslo"}),
            )]))
            .with_sequence_id(3),
            Chunk::message(Message::tool_result("c1", "rain")).with_sequence_id(4),
            Chunk::token("It rains.").with_sequence_id(5),
        ]));
        let session = session_with(transport.clone());

        let outcome = session
            .submit(vec![Message::human("earlier")], "weather in Oslo?")
            .await
            .expect("submit");

        let transcript = outcome.transcript();
        assert_eq!(
            texts(transcript),
            vec![
                (Role::Human, "earlier".to_string()),
                (Role::Human, "weather in Oslo?".to_string()),
                (Role::Assistant, "Let me check.".to_string()),
                (Role::Assistant, String::new()),
                (Role::Assistant, "It rains.".to_string()),
            ]
        );
        let call = transcript.messages()[3].tool_call("c1").expect("call");
        assert_eq!(call.result, Some(serde_json::json!("rain")));
        assert_eq!(session.transcript(), *transcript);
        assert!(!outcome.is_cancelled());

        let requests = transport.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        let body = requests[0].to_body();
        assert_eq!(body.message, "weather in Oslo?");
        assert_eq!(body.thread_id, "thread-1");
        assert_eq!(body.session_id, "thread-1");
    }

    #[tokio::test]
    async fn events_start_with_history_snapshot_and_end_with_one_terminal() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("hi").with_sequence_id(1),
        ]));
        let session = session_with(transport);
        let mut stream = session
            .start_submit(Vec::new(), "hello")
            .await
            .expect("start");

        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }

        assert!(matches!(events[0], SessionEvent::Started { .. }));
        match &events[1] {
            SessionEvent::Snapshot {
                seq, transcript, ..
            } => {
                assert_eq!(*seq, 0);
                assert_eq!(texts(transcript), vec![(Role::Human, "hello".to_string())]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(events[2], SessionEvent::Snapshot { seq: 1, .. }));
        assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(SessionEvent::Completed { .. })));

        let outcome = stream.finish().await.expect("finish");
        assert_eq!(outcome.transcript().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_chunk_ids_are_applied_once() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("a").with_sequence_id(1),
            Chunk::token("a").with_sequence_id(1),
            Chunk::token("b").with_sequence_id(2),
        ]));
        let session = session_with(transport);
        let outcome = session.submit(Vec::new(), "go").await.expect("submit");
        assert_eq!(
            outcome.transcript().last().map(|m| m.content.to_text()),
            Some("ab".to_string())
        );
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_opening_a_stream() {
        let transport = Arc::new(FakeTransport::with_chunks(Vec::new()));
        let session = session_with(transport.clone());
        let result = session.start_submit(Vec::new(), "   ").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
        assert!(transport.requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn cancel_keeps_last_snapshot_and_reports_nothing() {
        let transport = Arc::new(FakeTransport::hanging(vec![
            Chunk::token("Hel").with_sequence_id(1),
        ]));
        let (handler, seen) = counting_handler();
        let session = ChatSession::new(
            transport,
            SessionConfig::for_thread("thread-1"),
            Some(handler),
        );
        let mut stream = session
            .start_submit(Vec::new(), "hi")
            .await
            .expect("start");

        loop {
            match stream.next_event().await.expect("event") {
                SessionEvent::Snapshot { seq: 1, .. } => break,
                SessionEvent::Failed { error, .. } => panic!("unexpected failure: {error}"),
                _ => {}
            }
        }
        assert!(session.is_streaming());
        session.cancel();
        session.cancel();

        let outcome = stream.finish().await.expect("finish");
        assert!(outcome.is_cancelled());
        assert_eq!(
            texts(outcome.transcript()),
            vec![
                (Role::Human, "hi".to_string()),
                (Role::Assistant, "Hel".to_string()),
            ]
        );
        assert_eq!(session.transcript(), *outcome.transcript());
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn chunks_arriving_after_cancel_are_not_applied() {
        let (transport, feed) = ScriptedTransport::new();
        let session = ChatSession::new(
            Arc::new(transport),
            SessionConfig::for_thread("thread-1"),
            None,
        );
        let mut stream = session
            .start_submit(Vec::new(), "hi")
            .await
            .expect("start");

        feed.send(bytes::Bytes::from(frame(Chunk::token("A").with_sequence_id(1))))
            .expect("feed A");
        loop {
            match stream.next_event().await.expect("event") {
                SessionEvent::Snapshot { seq: 1, .. } => break,
                SessionEvent::Failed { error, .. } => panic!("unexpected failure: {error}"),
                _ => {}
            }
        }
        session.cancel();
        // The task may already have dropped the receiver.
        let _ = feed.send(bytes::Bytes::from(frame(Chunk::token("B").with_sequence_id(2))));
        let _ = feed.send(bytes::Bytes::from_static(crate::chunk::DONE_FRAME.as_bytes()));

        let outcome = stream.finish().await.expect("finish");
        assert!(outcome.is_cancelled());
        assert_eq!(
            texts(outcome.transcript()),
            vec![
                (Role::Human, "hi".to_string()),
                (Role::Assistant, "A".to_string()),
            ]
        );
        assert_eq!(session.transcript(), *outcome.transcript());
    }

    #[tokio::test]
    async fn resubmitting_applies_reused_chunk_ids_again() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("again").with_sequence_id(1),
        ]));
        let session = session_with(transport.clone());

        let first = session.submit(Vec::new(), "one").await.expect("first");
        let second = session
            .submit(first.into_transcript().into_messages(), "two")
            .await
            .expect("second");

        assert_eq!(
            texts(second.transcript()),
            vec![
                (Role::Human, "one".to_string()),
                (Role::Assistant, "again".to_string()),
                (Role::Human, "two".to_string()),
                (Role::Assistant, "again".to_string()),
            ]
        );
        assert_eq!(transport.requests.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn malformed_block_between_tokens_is_skipped() {
        let transport = Arc::new(FakeTransport {
            frames: vec![
                frame(Chunk::token("A").with_sequence_id(1)),
                "data: {\"type\":\"token\",\"content\":\n\n".to_string(),
                frame(Chunk::token("B").with_sequence_id(2)),
                crate::chunk::DONE_FRAME.to_string(),
            ],
            ..FakeTransport::default()
        });
        let (handler, seen) = counting_handler();
        let session = ChatSession::new(
            transport,
            SessionConfig::for_thread("thread-1"),
            Some(handler),
        );

        let outcome = session.submit(Vec::new(), "hi").await.expect("submit");
        assert_eq!(
            texts(outcome.transcript()),
            vec![
                (Role::Human, "hi".to_string()),
                (Role::Assistant, "AB".to_string()),
            ]
        );
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn new_submission_cancels_the_previous_one() {
        let transport = Arc::new(FakeTransport::hanging(Vec::new()));
        let session = session_with(transport.clone());

        let first = session
            .start_submit(Vec::new(), "first")
            .await
            .expect("start first");
        let second = session
            .start_submit(Vec::new(), "second")
            .await
            .expect("start second");

        let first_outcome = first.finish().await.expect("first");
        assert!(first_outcome.is_cancelled());

        second.abort_handle().abort();
        let second_outcome = second.finish().await.expect("second");
        assert!(second_outcome.is_cancelled());
        assert_eq!(
            second_outcome.transcript().last().map(|m| m.content.to_text()),
            Some("second".to_string())
        );
        assert_eq!(transport.requests.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn open_failure_is_reported_once() {
        let transport = Arc::new(FakeTransport {
            open_error: Some(TransportError::status(502, "bad gateway")),
            ..FakeTransport::default()
        });
        let (handler, seen) = counting_handler();
        let session = ChatSession::new(
            transport,
            SessionConfig::for_thread("thread-1"),
            Some(handler),
        );

        let result = session.submit(Vec::new(), "hi").await;
        assert!(matches!(
            result,
            Err(ChatError::StreamFailed(StreamFailure::Transport { .. }))
        ));
        assert_eq!(seen.lock().expect("lock").len(), 1);
        assert_eq!(
            texts(&session.transcript()),
            vec![(Role::Human, "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_applied_state() {
        let mut transport =
            FakeTransport::hanging(vec![Chunk::token("partial").with_sequence_id(1)]);
        transport.hang = false;
        transport.fail_after_frames = Some(TransportError::stream("connection reset"));
        let (handler, seen) = counting_handler();
        let session = ChatSession::new(
            Arc::new(transport),
            SessionConfig::for_thread("thread-1"),
            Some(handler),
        );

        let mut stream = session
            .start_submit(Vec::new(), "hi")
            .await
            .expect("start");
        let mut failed_transcript = None;
        while let Some(event) = stream.next_event().await {
            if let SessionEvent::Failed { transcript, .. } = event {
                failed_transcript = Some(transcript);
            }
        }
        let result = stream.finish().await;

        assert!(matches!(result, Err(ChatError::StreamFailed(_))));
        let transcript = failed_transcript.expect("failed event");
        assert_eq!(
            transcript.last().map(|m| m.content.to_text()),
            Some("partial".to_string())
        );
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn agent_error_chunks_are_reported_and_stream_continues() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("one").with_sequence_id(1),
            Chunk::error(AgentNotice::new("tool timed out", "tool_timeout", true)),
            Chunk::token(" two").with_sequence_id(2),
        ]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: ErrorHandler = Arc::new(move |failure: &StreamFailure| {
            assert!(matches!(failure, StreamFailure::Agent { .. }));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let session = ChatSession::new(
            transport,
            SessionConfig::for_thread("thread-1"),
            Some(handler),
        );

        let outcome = session.submit(Vec::new(), "go").await.expect("submit");
        match outcome {
            SubmitOutcome::Completed {
                transcript,
                agent_errors,
            } => {
                assert_eq!(agent_errors.len(), 1);
                assert_eq!(agent_errors[0].error_type, "tool_timeout");
                assert_eq!(
                    transcript.last().map(|m| m.content.to_text()),
                    Some("one two".to_string())
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_final_snapshot() {
        let transport = Arc::new(FakeTransport::with_chunks(vec![
            Chunk::token("done").with_sequence_id(1),
        ]));
        let session = session_with(transport);
        let rx = session.subscribe();
        let outcome = session.submit(Vec::new(), "go").await.expect("submit");
        assert_eq!(*rx.borrow(), *outcome.transcript());
    }

    #[test]
    fn config_validation() {
        assert!(SessionConfig::for_thread("t").validate().is_ok());
        assert!(SessionConfig::for_thread(" ").validate().is_err());
        assert!(
            SessionConfig::for_thread("t")
                .stream_buffer_capacity(0)
                .validate()
                .is_err()
        );
        let config = SessionConfig::for_thread("t").session_id("s").user_id("u");
        assert_eq!(config.session_id, "s");
        assert_eq!(config.user_id, "u");
    }
}
