use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chat_stream::{Transcript, resolve_history};
use tracing::debug;

use crate::app::{AppState, forwarded_token};
use crate::error::RelayError;

/// GET /api/v1/history/{thread_id}: the thread's messages with tool results
/// folded into the calls they answer.
pub async fn history_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Transcript>, RelayError> {
    let messages = state
        .agent
        .fetch_thread_history(&thread_id, forwarded_token(&headers))
        .await?;
    let transcript = resolve_history(messages);
    debug!(thread_id = %thread_id, messages = transcript.len(), "served thread history");
    Ok(Json(transcript))
}
