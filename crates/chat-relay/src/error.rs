use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chat_stream::TransportError;
use tracing::warn;

/// Errors surfaced by relay routes and startup.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),
    #[error("upstream error: {0}")]
    Upstream(#[from] TransportError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(TransportError::Status { status: 404, .. }) => {
                StatusCode::NOT_FOUND
            }
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::Upstream(_) => "upstream",
            RelayError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "relay request failed");
        }
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
