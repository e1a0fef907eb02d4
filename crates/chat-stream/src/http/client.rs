use futures::StreamExt as _;
use tracing::debug;

use crate::errors::{ChatError, TransportError};
use crate::message::Message;
use crate::transport::{AgentTransport, ByteStream, StreamRequestBody, SubmitRequest};

use super::config::HttpAgentConfig;

const TOKEN_HEADER: &str = "X-Token";

/// `AgentTransport` over HTTP.
///
/// Streams are opened with `POST {base}/v1/stream`; histories come from
/// `GET {base}/v1/history/{thread_id}`.
#[derive(Clone, Debug)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
    config: HttpAgentConfig,
}

impl HttpAgentClient {
    /// Creates a client from explicit configuration.
    pub fn new(config: HttpAgentConfig) -> Result<Self, ChatError> {
        let base_url = config.parsed_base_url()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build agent http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Creates a client from `AGENT_API_URL` and friends.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(HttpAgentConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpAgentConfig {
        &self.config
    }

    /// Opens the agent event stream for a prepared body.
    ///
    /// `token` overrides the configured access token for this request.
    pub async fn open_body_stream(
        &self,
        body: &StreamRequestBody,
        token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        let url = self.endpoint(&["v1", "stream"])?;
        debug!(thread_id = %body.thread_id, user_id = %body.user_id, url = %url, "opening agent stream");

        let request = self
            .authorize(self.client.post(url), token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body);
        let response = match tokio::time::timeout(self.config.timeout, request.send()).await {
            Ok(sent) => {
                sent.map_err(|e| TransportError::request(e.to_string()))?
            }
            Err(_) => {
                return Err(TransportError::request(format!(
                    "no response within {}s",
                    self.config.timeout.as_secs()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body));
        }

        let stream = response.bytes_stream().map(|item| {
            item.map_err(|e| TransportError::stream(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    /// Fetches the stored messages of a thread, unresolved.
    pub async fn fetch_thread_history(
        &self,
        thread_id: &str,
        token: Option<&str>,
    ) -> Result<Vec<Message>, TransportError> {
        let url = self.endpoint(&["v1", "history", thread_id])?;
        debug!(thread_id, url = %url, "fetching thread history");

        let response = self
            .authorize(self.client.get(url), token)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::stream(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::protocol(format!("invalid history payload: {e}")))
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match token.or(self.config.access_token.as_deref()) {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::request("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl AgentTransport for HttpAgentClient {
    async fn open_stream(&self, request: SubmitRequest) -> Result<ByteStream, TransportError> {
        self.open_body_stream(&request.to_body(), None).await
    }

    async fn fetch_history(&self, thread_id: &str) -> Result<Vec<Message>, TransportError> {
        self.fetch_thread_history(thread_id, None).await
    }
}
