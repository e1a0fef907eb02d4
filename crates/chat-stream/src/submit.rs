use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::chunk::AgentNotice;
use crate::decoder::decode_chunks;
use crate::dedup::Deduplicator;
use crate::errors::{ChatError, StreamFailure, TransportError, stream_failure_from_transport};
use crate::event::SessionEvent;
use crate::message::Transcript;
use crate::reducer::{ReduceOutcome, TranscriptReducer};
use crate::transport::{AgentTransport, SubmitRequest};

/// Callback receiving stream failures and agent error notices.
pub type ErrorHandler = Arc<dyn Fn(&StreamFailure) + Send + Sync>;

/// Handle used to cancel an in-flight submission.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Requests cancellation. Idempotent.
    ///
    /// The connection is dropped as soon as the submission task observes the
    /// signal; no chunk read after that point is applied.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `abort` was called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// How a submission ended, when it did not fail.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// The stream ended normally. Agent error notices seen on the way are
    /// kept in arrival order.
    Completed {
        transcript: Transcript,
        agent_errors: Vec<AgentNotice>,
    },
    /// The submission was cancelled; the transcript is the last snapshot.
    Cancelled { transcript: Transcript },
}

impl SubmitOutcome {
    pub fn transcript(&self) -> &Transcript {
        match self {
            SubmitOutcome::Completed { transcript, .. } => transcript,
            SubmitOutcome::Cancelled { transcript } => transcript,
        }
    }

    pub fn into_transcript(self) -> Transcript {
        match self {
            SubmitOutcome::Completed { transcript, .. } => transcript,
            SubmitOutcome::Cancelled { transcript } => transcript,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SubmitOutcome::Cancelled { .. })
    }
}

/// Streaming handle returned by `ChatSession::start_submit`.
///
/// Use `next_event()` to observe snapshots as they are published and
/// `finish()` to wait for the terminal result.
pub struct SubmitStream {
    pub(crate) submission_id: uuid::Uuid,
    pub(crate) thread_id: String,
    pub(crate) rx: mpsc::Receiver<SessionEvent>,
    pub(crate) final_rx: oneshot::Receiver<Result<SubmitOutcome, ChatError>>,
    pub(crate) abort_handle: AbortHandle,
    pub(crate) saw_terminal: bool,
}

impl SubmitStream {
    pub fn submission_id(&self) -> uuid::Uuid {
        self.submission_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns a handle that can cancel this submission.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next event.
    ///
    /// Returns `None` once the submission task is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(SessionEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns the terminal result.
    ///
    /// Safe to call after consuming events with `next_event()`.
    pub async fn finish(mut self) -> Result<SubmitOutcome, ChatError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ChatError::protocol_msg(format!(
                "submission task ended without a result (thread={})",
                self.thread_id
            ))),
        }
    }
}

/// Everything a spawned submission needs.
pub(crate) struct SubmitTask {
    pub(crate) transport: Arc<dyn AgentTransport>,
    pub(crate) request: SubmitRequest,
    pub(crate) live: Arc<watch::Sender<Transcript>>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) events: mpsc::Sender<SessionEvent>,
    pub(crate) final_tx: oneshot::Sender<Result<SubmitOutcome, ChatError>>,
}

struct Publisher {
    submission_id: uuid::Uuid,
    events: mpsc::Sender<SessionEvent>,
    live: Arc<watch::Sender<Transcript>>,
    abort_rx: watch::Receiver<bool>,
    seq: u64,
}

impl Publisher {
    async fn send(&mut self, event: SessionEvent) {
        tokio::select! {
            biased;
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!(submission_id = %self.submission_id, "submission event receiver dropped");
                }
            }
            _ = wait_for_abort(&mut self.abort_rx) => {
                debug!(submission_id = %self.submission_id, "event channel full after abort; dropping event");
            }
        }
    }

    async fn snapshot(&mut self, transcript: &Transcript) {
        self.live.send_replace(transcript.clone());
        let seq = self.seq;
        self.seq = self.seq.saturating_add(1);
        let event = SessionEvent::Snapshot {
            submission_id: self.submission_id,
            seq,
            transcript: transcript.clone(),
        };
        self.send(event).await;
    }
}

async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn report(on_error: &Option<ErrorHandler>, failure: &StreamFailure) {
    if let Some(handler) = on_error {
        handler(failure);
    }
}

enum Ending {
    Completed(Vec<AgentNotice>),
    Cancelled,
    Failed(TransportError),
}

pub(crate) async fn run_submission(task: SubmitTask, mut abort_rx: watch::Receiver<bool>) {
    let SubmitTask {
        transport,
        request,
        live,
        on_error,
        events,
        final_tx,
    } = task;
    let submission_id = request.submission_id;
    let thread_id = request.thread_id.clone();
    let mut publisher = Publisher {
        submission_id,
        events,
        live,
        abort_rx: abort_rx.clone(),
        seq: 0,
    };

    publisher
        .send(SessionEvent::Started {
            submission_id,
            thread_id: thread_id.clone(),
        })
        .await;
    let initial = Transcript::from_messages(request.messages.clone());
    publisher.snapshot(&initial).await;

    let opened = tokio::select! {
        biased;
        _ = wait_for_abort(&mut abort_rx) => None,
        opened = transport.open_stream(request) => Some(opened),
    };

    let (ending, transcript) = match opened {
        None => (Ending::Cancelled, initial),
        Some(Err(err)) => (Ending::Failed(err), initial),
        Some(Ok(bytes)) => {
            debug!(submission_id = %submission_id, thread_id = %thread_id, "agent stream opened");
            let mut chunks = decode_chunks(bytes);
            let mut dedup = Deduplicator::new();
            let mut reducer = TranscriptReducer::with_transcript(initial);
            let mut notices = Vec::new();
            let ending = loop {
                let next = tokio::select! {
                    biased;
                    _ = wait_for_abort(&mut abort_rx) => None,
                    next = chunks.next() => Some(next),
                };
                let chunk = match next {
                    None => break Ending::Cancelled,
                    Some(None) => break Ending::Completed(notices),
                    Some(Some(Err(err))) => break Ending::Failed(err),
                    Some(Some(Ok(chunk))) => chunk,
                };
                if *abort_rx.borrow() {
                    break Ending::Cancelled;
                }
                if !dedup.admit(&chunk) {
                    debug!(submission_id = %submission_id, chunk_id = ?chunk.sequence_id(), "skipping duplicate chunk");
                    continue;
                }
                let kind = chunk.kind();
                match reducer.apply(chunk) {
                    ReduceOutcome::AgentError(notice) => {
                        warn!(
                            submission_id = %submission_id,
                            error_type = %notice.error_type,
                            recoverable = notice.recoverable,
                            "agent reported an error: {}",
                            notice.message
                        );
                        report(&on_error, &StreamFailure::from(&notice));
                        publisher
                            .send(SessionEvent::AgentError {
                                submission_id,
                                notice: notice.clone(),
                            })
                            .await;
                        notices.push(notice);
                    }
                    outcome if outcome.changed_transcript() => {
                        debug!(submission_id = %submission_id, kind, seq = publisher.seq, "applied chunk");
                        publisher.snapshot(reducer.transcript()).await;
                    }
                    outcome => {
                        debug!(submission_id = %submission_id, kind, ?outcome, "chunk left transcript unchanged");
                    }
                }
            };
            drop(chunks);
            (ending, reducer.into_transcript())
        }
    };

    let (event, result) = match ending {
        Ending::Completed(agent_errors) => {
            info!(submission_id = %submission_id, thread_id = %thread_id, messages = transcript.len(), "submission completed");
            (
                SessionEvent::Completed {
                    submission_id,
                    transcript: transcript.clone(),
                },
                Ok(SubmitOutcome::Completed {
                    transcript,
                    agent_errors,
                }),
            )
        }
        Ending::Cancelled => {
            info!(submission_id = %submission_id, thread_id = %thread_id, "submission cancelled");
            (
                SessionEvent::Cancelled {
                    submission_id,
                    transcript: transcript.clone(),
                },
                Ok(SubmitOutcome::Cancelled { transcript }),
            )
        }
        Ending::Failed(err) => {
            let failure = stream_failure_from_transport(&err);
            warn!(submission_id = %submission_id, thread_id = %thread_id, error = %failure, "submission failed");
            report(&on_error, &failure);
            (
                SessionEvent::Failed {
                    submission_id,
                    error: failure.clone(),
                    transcript,
                },
                Err(ChatError::StreamFailed(failure)),
            )
        }
    };
    publisher.send(event).await;
    let _ = final_tx.send(result);
}
