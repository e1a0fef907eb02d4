use crate::chunk::AgentNotice;

/// Errors raised by an agent transport before they are normalized for the
/// public session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, timeout).
    #[error("agent request failed: {message}")]
    Request { message: String },
    /// The agent answered with a non-success HTTP status.
    #[error("agent responded with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("agent stream read failed: {message}")]
    Stream { message: String },
    /// The agent's response did not have the expected shape.
    #[error("agent protocol error: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a stream read error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Terminal or reported stream failure, handed to error handlers and carried
/// by `SessionEvent::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// Network/stream transport failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The agent reported an error chunk.
    #[error("agent error ({error_type}): {message}")]
    Agent {
        message: String,
        error_type: String,
        recoverable: bool,
    },
    /// The agent response was malformed at the transport level.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl From<&AgentNotice> for StreamFailure {
    fn from(notice: &AgentNotice) -> Self {
        StreamFailure::Agent {
            message: notice.message.clone(),
            error_type: notice.error_type.clone(),
            recoverable: notice.recoverable,
        }
    }
}

/// Top-level error type for the public chat API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client/transport configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport error outside a running submission (history fetch).
    #[error(transparent)]
    Transport(TransportError),
    /// Terminal failure of a started submission.
    #[error(transparent)]
    StreamFailed(StreamFailure),
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StreamFailure> for ChatError {
    fn from(value: StreamFailure) -> Self {
        ChatError::StreamFailed(value)
    }
}

impl From<TransportError> for ChatError {
    fn from(value: TransportError) -> Self {
        ChatError::Transport(value)
    }
}

pub(crate) fn stream_failure_from_transport(err: &TransportError) -> StreamFailure {
    match err {
        TransportError::Protocol { message } => StreamFailure::Protocol {
            message: message.clone(),
        },
        other => StreamFailure::Transport {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_failures() {
        assert_eq!(
            stream_failure_from_transport(&TransportError::status(502, "bad gateway")),
            StreamFailure::Transport {
                message: "agent responded with status 502: bad gateway".into()
            }
        );
        assert!(matches!(
            stream_failure_from_transport(&TransportError::protocol("bad json")),
            StreamFailure::Protocol { .. }
        ));
    }

    #[test]
    fn agent_notice_becomes_agent_failure() {
        let failure = StreamFailure::from(&AgentNotice::new("quota", "rate_limit", true));
        assert_eq!(failure.to_string(), "agent error (rate_limit): quota");
    }
}
