use std::pin::Pin;

use crate::errors::TransportError;
use crate::message::{Message, Role};

/// Cancellable byte source for one agent stream. Dropping it aborts the
/// underlying connection.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// JSON body of a stream submission, as sent to the agent.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamRequestBody {
    pub message: String,
    pub thread_id: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(default = "default_stream_tokens")]
    pub stream_tokens: bool,
}

fn default_stream_tokens() -> bool {
    true
}

/// Normalized submission passed to an `AgentTransport`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitRequest {
    pub submission_id: uuid::Uuid,
    pub thread_id: String,
    pub session_id: String,
    pub user_id: String,
    /// Full history, ending with the new human message.
    pub messages: Vec<Message>,
}

impl SubmitRequest {
    /// Text of the most recent human message.
    pub fn latest_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Human)
            .map(|message| message.content.to_text())
    }

    /// Builds the wire body for this submission.
    pub fn to_body(&self) -> StreamRequestBody {
        StreamRequestBody {
            message: self.latest_user_text().unwrap_or_default(),
            thread_id: self.thread_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            stream_tokens: true,
        }
    }
}

/// Connection to the agent service.
///
/// Implementations open one event stream per submission and fetch stored
/// thread histories. The HTTP implementation lives in `crate::http`.
#[async_trait::async_trait]
pub trait AgentTransport: Send + Sync {
    /// Opens the event stream for a submission.
    async fn open_stream(&self, request: SubmitRequest) -> Result<ByteStream, TransportError>;

    /// Fetches the stored message list of a thread, oldest first.
    async fn fetch_history(&self, thread_id: &str) -> Result<Vec<Message>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_latest_human_message() {
        let request = SubmitRequest {
            submission_id: uuid::Uuid::new_v4(),
            thread_id: "t1".into(),
            session_id: "t1".into(),
            user_id: "alice".into(),
            messages: vec![
                Message::human("first"),
                Message::assistant("reply"),
                Message::human("second"),
            ],
        };
        let body = serde_json::to_value(request.to_body()).expect("json");
        assert_eq!(
            body,
            serde_json::json!({
                "message": "second",
                "thread_id": "t1",
                "session_id": "t1",
                "user_id": "alice",
                "stream_tokens": true
            })
        );
    }

    #[test]
    fn stream_tokens_defaults_to_true() {
        let body: StreamRequestBody = serde_json::from_value(serde_json::json!({
            "message": "hi", "thread_id": "t", "session_id": "s", "user_id": "u"
        }))
        .expect("parse");
        assert!(body.stream_tokens);
    }
}
