use std::fmt;

/// Identifier of a transcript entry, unique within one transcript.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a message id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Author of a transcript entry. Serialized with the agent's `type` names.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "ai")]
    Assistant,
    #[serde(rename = "tool")]
    ToolResult,
}

/// Message body: plain text, or an opaque structured value (tool output).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl Content {
    /// Returns the text when this is a text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Structured(_) => None,
        }
    }

    /// Renders the body as text; structured values become compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => value.to_string(),
        }
    }

    /// Converts the body into a JSON value.
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Content::Text(text) => serde_json::Value::String(text),
            Content::Structured(value) => value,
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

fn generated_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn call_id_or_generated<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let id: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    Ok(id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generated_call_id))
}

/// A tool invocation requested by the assistant, holding its result once the
/// matching tool message arrives.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRef {
    /// Correlation key assigned by the agent. A null or missing id is
    /// replaced by a generated one that no tool result can match.
    #[serde(
        rename = "id",
        default = "generated_call_id",
        deserialize_with = "call_id_or_generated"
    )]
    pub call_id: String,
    pub name: String,
    #[serde(rename = "args", default)]
    pub arguments: serde_json::Value,
    /// Set at most once by a tool-result message with the same `call_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ToolCallRef {
    /// Creates a pending tool call without a result.
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
            result: None,
        }
    }
}

/// One transcript entry, in the agent's message shape.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    #[serde(default = "MessageId::generate")]
    pub id: MessageId,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    /// Correlation key of a tool-result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: Content) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates a human message.
    pub fn human(text: impl Into<String>) -> Self {
        Self::with_role(Role::Human, Content::Text(text.into()))
    }

    /// Creates an assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Content::Text(text.into()))
    }

    /// Creates an assistant message that requests the given tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRef>) -> Self {
        let mut message = Self::with_role(Role::Assistant, Content::default());
        message.tool_calls = calls;
        message
    }

    /// Creates a tool-result message for `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        let mut message = Self::with_role(Role::ToolResult, content.into());
        message.tool_call_id = Some(call_id.into());
        message
    }

    /// Replaces the generated id.
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns true for assistant messages that initiate tool use.
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Finds a tool call on this message by its correlation key.
    pub fn tool_call(&self, call_id: &str) -> Option<&ToolCallRef> {
        self.tool_calls.iter().find(|call| call.call_id == call_id)
    }
}

/// Ordered conversation transcript.
///
/// Append-only from the outside; the reducer is the only writer that extends
/// the active streaming message or fills in tool results.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing ordered message list.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Looks up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    /// Consumes the transcript and returns its messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self::from_messages(messages)
    }
}
