use crate::chunk::AgentNotice;
use crate::errors::StreamFailure;
use crate::message::Transcript;

/// Events emitted by a `SubmitStream`, in the order they happened.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// First event for every submission.
    Started {
        submission_id: uuid::Uuid,
        thread_id: String,
    },
    /// Transcript after an applied chunk. `seq` 0 is the history plus the new
    /// human message, before anything was streamed.
    Snapshot {
        submission_id: uuid::Uuid,
        seq: u64,
        transcript: Transcript,
    },
    /// Error notice from the agent. The stream continues.
    AgentError {
        submission_id: uuid::Uuid,
        notice: AgentNotice,
    },
    /// Terminal: the stream ended normally.
    Completed {
        submission_id: uuid::Uuid,
        transcript: Transcript,
    },
    /// Terminal: the submission was cancelled; `transcript` is the last
    /// published snapshot.
    Cancelled {
        submission_id: uuid::Uuid,
        transcript: Transcript,
    },
    /// Terminal: the transport failed. Applied state is kept in `transcript`.
    Failed {
        submission_id: uuid::Uuid,
        error: StreamFailure,
        transcript: Transcript,
    },
}

impl SessionEvent {
    /// Returns true for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Completed { .. }
                | SessionEvent::Cancelled { .. }
                | SessionEvent::Failed { .. }
        )
    }
}
