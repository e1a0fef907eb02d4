//! Common imports for typical chat usage.
pub use crate::{
    AbortHandle, ChatClient, ChatClientBuilder, ChatError, ChatSession, Content, Message, Role,
    SessionConfig, SessionEvent, StreamFailure, SubmitOutcome, SubmitStream, ToolCallRef,
    Transcript,
};
