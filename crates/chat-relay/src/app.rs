use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{get, post};
use chat_stream::http::HttpAgentClient;
use tower_http::cors::CorsLayer;

use crate::routes;

/// Header carrying the opaque access token from the browser to the agent.
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-token");

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<HttpAgentClient>,
    pub allowed_origin: Option<HeaderValue>,
}

impl AppState {
    pub fn new(agent: HttpAgentClient, allowed_origin: Option<HeaderValue>) -> Self {
        Self {
            agent: Arc::new(agent),
            allowed_origin,
        }
    }
}

fn cors_layer(allowed_origin: Option<HeaderValue>) -> CorsLayer {
    match allowed_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, TOKEN_HEADER]),
        None => CorsLayer::permissive(),
    }
}

/// Assemble the relay router. Every route lives under `/api`.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.allowed_origin.clone());
    let api = Router::new()
        .route("/health", get(routes::health::health_handler))
        .route("/v1/stream", post(routes::stream::stream_handler))
        .route(
            "/v1/history/{thread_id}",
            get(routes::history::history_handler),
        );

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Reads the forwarded access token, ignoring blank or non-ASCII values.
pub(crate) fn forwarded_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(&TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
