use std::net::SocketAddr;
use std::path::Path;

use axum::http::HeaderValue;
use chat_stream::http::HttpAgentConfig;

use crate::error::RelayError;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Loads `.env` from the crate directory, then from the working directory.
/// Variables already set in the process win.
pub fn load_env_files() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Runtime configuration of the relay.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub agent: HttpAgentConfig,
    /// CORS origin allowed to call the relay; any origin when `None`.
    pub allowed_origin: Option<HeaderValue>,
}

impl RelayConfig {
    /// Reads `RELAY_HOST`, `RELAY_PORT`, `RELAY_ALLOWED_ORIGIN` and the
    /// agent variables understood by `HttpAgentConfig::from_env`.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("RELAY_HOST")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup("RELAY_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| RelayError::Config(format!("invalid RELAY_PORT '{raw}': {e}")))?,
            None => DEFAULT_PORT,
        };
        let agent =
            HttpAgentConfig::from_lookup(&lookup).map_err(|e| RelayError::Config(e.to_string()))?;
        let allowed_origin = match lookup("RELAY_ALLOWED_ORIGIN").filter(|o| !o.trim().is_empty()) {
            Some(origin) => Some(HeaderValue::from_str(origin.trim()).map_err(|e| {
                RelayError::Config(format!("invalid RELAY_ALLOWED_ORIGIN '{origin}': {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            host,
            port,
            agent,
            allowed_origin,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, RelayError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address: {e}")))
    }
}
