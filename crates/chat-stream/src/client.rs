use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::errors::{ChatError, StreamFailure};
use crate::message::Transcript;
use crate::reducer::resolve_history;
use crate::session::{ChatSession, DEFAULT_STREAM_BUFFER_CAPACITY, DEFAULT_USER_ID, SessionConfig};
use crate::submit::ErrorHandler;
use crate::transport::AgentTransport;

struct ClientInner {
    transport: Arc<dyn AgentTransport>,
    user_id: String,
    stream_buffer_capacity: usize,
    on_error: Option<ErrorHandler>,
    sessions: DashMap<String, ChatSession>,
}

/// Entry point for chat sessions against one agent transport.
///
/// Hands out one `ChatSession` per thread id, so a thread never has two
/// concurrent streams.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    /// Starts a builder for configuring the transport and identity.
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::default()
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Returns the session for `thread_id`, creating it on first use.
    pub fn session(&self, thread_id: &str) -> Result<ChatSession, ChatError> {
        let config = SessionConfig::for_thread(thread_id)
            .user_id(self.inner.user_id.clone())
            .stream_buffer_capacity(self.inner.stream_buffer_capacity);
        config.validate()?;

        let session = self
            .inner
            .sessions
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                debug!(thread_id, "creating chat session");
                ChatSession::new(
                    self.inner.transport.clone(),
                    config,
                    self.inner.on_error.clone(),
                )
            })
            .value()
            .clone();
        Ok(session)
    }

    /// Cancels and forgets the session for `thread_id`. Returns true if one existed.
    pub fn close_session(&self, thread_id: &str) -> bool {
        match self.inner.sessions.remove(thread_id) {
            Some((_, session)) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Fetches a thread history and folds tool results into their calls.
    pub async fn history(&self, thread_id: &str) -> Result<Transcript, ChatError> {
        if thread_id.trim().is_empty() {
            return Err(ChatError::Validation("thread id must not be empty".into()));
        }
        let messages = self.inner.transport.fetch_history(thread_id).await?;
        debug!(thread_id, messages = messages.len(), "fetched thread history");
        Ok(resolve_history(messages))
    }
}

/// Builder used to configure a `ChatClient`.
pub struct ChatClientBuilder {
    transport: Option<Arc<dyn AgentTransport>>,
    user_id: String,
    stream_buffer_capacity: usize,
    on_error: Option<ErrorHandler>,
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            user_id: DEFAULT_USER_ID.to_string(),
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            on_error: None,
        }
    }
}

impl ChatClientBuilder {
    /// Sets the agent transport. Required.
    pub fn transport(mut self, transport: Arc<dyn AgentTransport>) -> Self {
        self.transport = Some(transport);
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

    /// Registers a callback for stream failures and agent error notices.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StreamFailure) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<ChatClient, ChatError> {
        let transport = self
            .transport
            .ok_or_else(|| ChatError::Config("an agent transport is required".into()))?;
        if self.user_id.trim().is_empty() {
            return Err(ChatError::Validation("user id must not be empty".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Validation(
                "stream_buffer_capacity must be greater than zero".into(),
            ));
        }
        Ok(ChatClient {
            inner: Arc::new(ClientInner {
                transport,
                user_id: self.user_id,
                stream_buffer_capacity: self.stream_buffer_capacity,
                on_error: self.on_error,
                sessions: DashMap::new(),
            }),
        })
    }
}
