//! Incremental reconstruction of agent chat transcripts from a streamed
//! chunk protocol.
//!
//! An agent answers a submission with a stream of blank-line separated
//! frames: token fragments, structured messages (assistant text, tool-call
//! requests, tool results) and error notices, closed by a `[DONE]` block.
//! This crate decodes that stream, drops duplicate chunks and folds the rest
//! into an ordered `Transcript`, publishing a snapshot after every change.
//!
//! # Builder-first usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream::http::HttpAgentClient;
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let client = ChatClient::builder()
//!     .transport(Arc::new(HttpAgentClient::from_env()?))
//!     .user_id("alice")
//!     .on_error(|failure| eprintln!("stream problem: {failure}"))
//!     .build()?;
//!
//! let session = client.session("thread-42")?;
//! let history = client.history("thread-42").await?;
//! let outcome = session
//!     .submit(history.into_messages(), "What is the weather in Oslo?")
//!     .await?;
//!
//! for message in outcome.transcript().messages() {
//!     println!("{:?}: {}", message.role, message.content.to_text());
//! }
//! # Ok(())
//! # }
//! ```

/// Wire chunks and the terminator frame.
pub mod chunk;
/// Client entry point and builder.
pub mod client;
/// Byte stream to chunk decoding.
pub mod decoder;
/// Per-submission duplicate chunk filter.
pub mod dedup;
/// Public error types.
pub mod errors;
/// Events emitted while a submission runs.
pub mod event;
/// HTTP implementation of the agent transport.
pub mod http;
/// Messages, tool calls and transcripts.
pub mod message;
/// Common imports for typical usage.
pub mod prelude;
/// Chunk folding and history resolution.
pub mod reducer;
/// Thread-bound session controller.
pub mod session;
/// Submission handle, outcome and cancellation.
pub mod submit;
/// Agent transport contract.
pub mod transport;

pub use chunk::{AgentNotice, Chunk, DONE_FRAME};
pub use client::{ChatClient, ChatClientBuilder};
pub use decoder::{BlockDecoder, ChunkStream, DecodedBlock, decode_block, decode_chunks};
pub use dedup::Deduplicator;
pub use errors::{ChatError, StreamFailure, TransportError};
pub use event::SessionEvent;
pub use message::{Content, Message, MessageId, Role, ToolCallRef, Transcript};
pub use reducer::{IgnoreReason, ReduceOutcome, TranscriptReducer, resolve_history};
pub use session::{ChatSession, SessionConfig};
pub use submit::{AbortHandle, ErrorHandler, SubmitOutcome, SubmitStream};
pub use transport::{AgentTransport, ByteStream, StreamRequestBody, SubmitRequest};
