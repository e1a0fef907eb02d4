use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chat_stream::{AgentNotice, ByteStream, Chunk, DONE_FRAME, StreamRequestBody, TransportError};
use futures::{Stream, StreamExt as _, stream};
use tracing::{info, warn};

use crate::app::{AppState, forwarded_token};
use crate::error::RelayError;

const PREVIEW_CHARS: usize = 100;

/// POST /api/v1/stream: forwards the submission and pipes the agent's event
/// stream back unchanged.
///
/// Failures to reach the agent are answered in-band with one error frame and
/// the terminator, so the browser always sees a well-formed stream.
pub async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StreamRequestBody>,
) -> Result<Response, RelayError> {
    if body.message.trim().is_empty() {
        return Err(RelayError::BadRequest("message must not be empty".into()));
    }
    if body.thread_id.trim().is_empty() {
        return Err(RelayError::BadRequest("thread_id must not be empty".into()));
    }

    let preview: String = body.message.chars().take(PREVIEW_CHARS).collect();
    info!(
        thread_id = %body.thread_id,
        user_id = %body.user_id,
        message = %preview,
        "relaying submission"
    );

    let token = forwarded_token(&headers);
    let stream_body = match state.agent.open_body_stream(&body, token).await {
        Ok(upstream) => Body::from_stream(relay_frames(upstream)),
        Err(err) => {
            warn!(thread_id = %body.thread_id, error = %err, "agent stream could not be opened");
            Body::from(failure_frames(open_failure_notice(&err)))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        stream_body,
    )
        .into_response())
}

fn open_failure_notice(err: &TransportError) -> AgentNotice {
    match err {
        TransportError::Status { status, .. } => AgentNotice::new(
            format!("agent rejected the request with status {status}"),
            "upstream_rejected",
            *status >= 500,
        ),
        other => AgentNotice::new(
            format!("agent is unavailable: {other}"),
            "upstream_unavailable",
            true,
        ),
    }
}

/// One error frame followed by the terminator.
fn failure_frames(notice: AgentNotice) -> Bytes {
    let mut out = String::new();
    match Chunk::error(notice).to_frame() {
        Ok(frame) => out.push_str(&frame),
        Err(err) => warn!(error = %err, "failed to encode relay error frame"),
    }
    out.push_str(DONE_FRAME);
    Bytes::from(out)
}

fn ends_at_block_boundary(bytes: &[u8]) -> bool {
    bytes.ends_with(b"\n\n") || bytes.ends_with(b"\r\n\r\n")
}

struct Relay {
    upstream: ByteStream,
    at_boundary: bool,
}

/// Forwards upstream bytes verbatim. A read error closes any partial block
/// and appends an error frame plus the terminator.
fn relay_frames(upstream: ByteStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let relay = Relay {
        upstream,
        at_boundary: true,
    };
    stream::unfold(Some(relay), |state| async move {
        let mut relay = state?;
        match relay.upstream.next().await {
            Some(Ok(bytes)) => {
                if !bytes.is_empty() {
                    relay.at_boundary = ends_at_block_boundary(&bytes);
                }
                Some((Ok(bytes), Some(relay)))
            }
            Some(Err(err)) => {
                warn!(error = %err, "agent stream broke mid-way");
                let mut out = Vec::new();
                if !relay.at_boundary {
                    out.extend_from_slice(b"\n\n");
                }
                let notice = AgentNotice::new(err.to_string(), "upstream_interrupted", true);
                out.extend_from_slice(&failure_frames(notice));
                Some((Ok(Bytes::from(out)), None))
            }
            None => None,
        }
    })
}
