use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::chunk::{AgentNotice, Chunk};
use crate::message::{Content, Message, MessageId, Role, Transcript};

/// Why a chunk left the transcript unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Plain assistant message repeating the token run that just streamed.
    ConsolidatedText,
    /// Tool result without a `tool_call_id`.
    MissingCorrelationKey,
    /// Tool result whose `tool_call_id` matches no known tool call.
    UnmatchedToolResult,
    /// Tool result for a call that already holds one.
    DuplicateToolResult,
}

/// Effect of applying one chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ReduceOutcome {
    /// A new message was appended.
    Appended { id: MessageId },
    /// The active streaming message grew.
    Extended { id: MessageId },
    /// A tool call received its result.
    ToolResultAttached {
        call_id: String,
        message_id: MessageId,
    },
    Ignored { reason: IgnoreReason },
    /// Error notice for the controller; the transcript is untouched.
    AgentError(AgentNotice),
}

impl ReduceOutcome {
    /// Returns true when the transcript changed and a snapshot is due.
    pub fn changed_transcript(&self) -> bool {
        matches!(
            self,
            ReduceOutcome::Appended { .. }
                | ReduceOutcome::Extended { .. }
                | ReduceOutcome::ToolResultAttached { .. }
        )
    }
}

/// Folds chunks, in delivery order, into a transcript.
///
/// The active streaming target is tracked explicitly; a token extends it only
/// while it is still the last message. Tool calls are indexed by `call_id`
/// so results are attached without scanning the transcript.
#[derive(Debug, Default)]
pub struct TranscriptReducer {
    transcript: Transcript,
    active: Option<MessageId>,
    calls: HashMap<String, (usize, usize)>,
    ids: HashSet<MessageId>,
}

impl TranscriptReducer {
    /// Creates a reducer over an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reducer that continues an existing transcript. Tool calls
    /// already present can still receive their results.
    pub fn with_transcript(transcript: Transcript) -> Self {
        let mut reducer = Self::default();
        for message in transcript.into_messages() {
            reducer.append(message);
        }
        reducer
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Clones the current transcript for publication.
    pub fn snapshot(&self) -> Transcript {
        self.transcript.clone()
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }

    /// Id of the message currently extended by token chunks.
    pub fn active_message(&self) -> Option<&MessageId> {
        self.active.as_ref()
    }

    /// Applies one chunk.
    pub fn apply(&mut self, chunk: Chunk) -> ReduceOutcome {
        match chunk {
            Chunk::Token { content, .. } => self.apply_token(content),
            Chunk::Message { content, .. } => self.apply_message(content),
            Chunk::Error { content } => ReduceOutcome::AgentError(content),
        }
    }

    fn apply_token(&mut self, text: String) -> ReduceOutcome {
        if let Some(active) = &self.active
            && let Some(last) = self.transcript.last_mut()
            && &last.id == active
            && let Content::Text(existing) = &mut last.content
        {
            existing.push_str(&text);
            return ReduceOutcome::Extended {
                id: last.id.clone(),
            };
        }

        let id = self.append(Message::assistant(text));
        self.active = Some(id.clone());
        ReduceOutcome::Appended { id }
    }

    fn apply_message(&mut self, mut message: Message) -> ReduceOutcome {
        let was_streaming = self.active.take().is_some();
        match message.role {
            Role::ToolResult => self.attach_tool_result(message),
            Role::Assistant if message.tool_calls.is_empty() && was_streaming => {
                debug!(message_id = %message.id, "ignoring consolidated copy of streamed text");
                ReduceOutcome::Ignored {
                    reason: IgnoreReason::ConsolidatedText,
                }
            }
            Role::Assistant => {
                for call in &mut message.tool_calls {
                    call.result = None;
                }
                ReduceOutcome::Appended {
                    id: self.append(message),
                }
            }
            Role::Human => ReduceOutcome::Appended {
                id: self.append(message),
            },
        }
    }

    fn attach_tool_result(&mut self, message: Message) -> ReduceOutcome {
        let Some(call_id) = message.tool_call_id else {
            warn!(message_id = %message.id, "dropping tool result without tool_call_id");
            return ReduceOutcome::Ignored {
                reason: IgnoreReason::MissingCorrelationKey,
            };
        };
        let Some(&(message_index, call_index)) = self.calls.get(&call_id) else {
            warn!(call_id = %call_id, "dropping tool result with no matching tool call");
            return ReduceOutcome::Ignored {
                reason: IgnoreReason::UnmatchedToolResult,
            };
        };
        let Some(owner) = self.transcript.get_mut(message_index) else {
            warn!(call_id = %call_id, "tool call index points past the transcript");
            return ReduceOutcome::Ignored {
                reason: IgnoreReason::UnmatchedToolResult,
            };
        };
        let Some(call) = owner.tool_calls.get_mut(call_index) else {
            warn!(call_id = %call_id, "tool call index points past the message");
            return ReduceOutcome::Ignored {
                reason: IgnoreReason::UnmatchedToolResult,
            };
        };
        if call.result.is_some() {
            warn!(call_id = %call_id, "ignoring second result for tool call");
            return ReduceOutcome::Ignored {
                reason: IgnoreReason::DuplicateToolResult,
            };
        }
        call.result = Some(message.content.into_value());
        ReduceOutcome::ToolResultAttached {
            call_id,
            message_id: owner.id.clone(),
        }
    }

    fn append(&mut self, mut message: Message) -> MessageId {
        if !self.ids.insert(message.id.clone()) {
            let fresh = MessageId::generate();
            debug!(duplicate = %message.id, assigned = %fresh, "reassigning duplicate message id");
            message.id = fresh;
            self.ids.insert(message.id.clone());
        }
        let message_index = self.transcript.len();
        for (call_index, call) in message.tool_calls.iter().enumerate() {
            if self.calls.contains_key(&call.call_id) {
                warn!(call_id = %call.call_id, "duplicate tool call id; keeping the first");
                continue;
            }
            self.calls
                .insert(call.call_id.clone(), (message_index, call_index));
        }
        let id = message.id.clone();
        self.transcript.push(message);
        id
    }
}

/// Folds a thread history into transcript form: tool-result messages are
/// merged into the tool calls they answer and do not appear on their own.
pub fn resolve_history(messages: Vec<Message>) -> Transcript {
    let mut reducer = TranscriptReducer::new();
    for message in messages {
        if message.role == Role::ToolResult {
            reducer.attach_tool_result(message);
        } else {
            reducer.append(message);
        }
    }
    reducer.into_transcript()
}
