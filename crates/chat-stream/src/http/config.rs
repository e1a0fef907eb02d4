use std::time::Duration;

use crate::errors::ChatError;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for the HTTP agent client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpAgentConfig {
    /// Base URL of the agent service, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Sent as `X-Token` when the caller supplies none.
    pub access_token: Option<String>,
    /// Bound on history requests and on waiting for stream response headers.
    /// An open stream is not cut off by it.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpAgentConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Builds a config from `AGENT_API_URL`, `AGENT_ACCESS_TOKEN` and
    /// `AGENT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("AGENT_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ChatError::Config(
                "missing AGENT_API_URL for the agent client".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(token) = lookup("AGENT_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()) {
            config.access_token = Some(token);
        }
        if let Some(raw) = lookup("AGENT_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                ChatError::Config(format!("invalid AGENT_TIMEOUT_SECS '{raw}': {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn parsed_base_url(&self) -> Result<reqwest::Url, ChatError> {
        let url = reqwest::Url::parse(self.base_url.trim()).map_err(|e| {
            ChatError::Config(format!("invalid agent base url '{}': {e}", self.base_url))
        })?;
        if url.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "agent base url '{}' cannot carry a path",
                self.base_url
            )));
        }
        Ok(url)
    }
}
