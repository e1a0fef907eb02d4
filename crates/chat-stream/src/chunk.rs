use crate::message::Message;

/// Frame that ends an event stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Error notice sent by the agent inside the event stream.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AgentNotice {
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default)]
    pub error_type: String,
}

impl AgentNotice {
    /// Creates a notice.
    pub fn new(
        message: impl Into<String>,
        error_type: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            recoverable,
            error_type: error_type.into(),
        }
    }
}

/// One decoded unit of the agent event stream.
///
/// `chunk_id` is only used for de-duplication. Delivery order decides
/// transcript order.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Chunk {
    /// Incremental text fragment.
    Token {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_id: Option<u64>,
    },
    /// Complete structured message (tool call, tool result, ...).
    Message {
        content: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_id: Option<u64>,
    },
    /// Error notice; never written into the transcript.
    Error { content: AgentNotice },
}

impl Chunk {
    /// Creates a token chunk without a sequence id.
    pub fn token(text: impl Into<String>) -> Self {
        Chunk::Token {
            content: text.into(),
            chunk_id: None,
        }
    }

    /// Creates a structured-message chunk without a sequence id.
    pub fn message(message: Message) -> Self {
        Chunk::Message {
            content: message,
            chunk_id: None,
        }
    }

    /// Creates an error chunk.
    pub fn error(notice: AgentNotice) -> Self {
        Chunk::Error { content: notice }
    }

    /// Sets the sender-assigned sequence id. Error chunks carry none.
    pub fn with_sequence_id(mut self, id: u64) -> Self {
        match &mut self {
            Chunk::Token { chunk_id, .. } | Chunk::Message { chunk_id, .. } => *chunk_id = Some(id),
            Chunk::Error { .. } => {}
        }
        self
    }

    /// Returns the sender-assigned sequence id, if any.
    pub fn sequence_id(&self) -> Option<u64> {
        match self {
            Chunk::Token { chunk_id, .. } | Chunk::Message { chunk_id, .. } => *chunk_id,
            Chunk::Error { .. } => None,
        }
    }

    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Token { .. } => "token",
            Chunk::Message { .. } => "message",
            Chunk::Error { .. } => "error",
        }
    }

    /// Encodes the chunk as one `data: ` frame terminated by a blank line.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
