//! HTTP relay between browser chat clients and the agent service.
//!
//! Routes (all under `/api`):
//! - `GET /health`: liveness probe.
//! - `POST /v1/stream`: forwards a submission and pipes the agent's event
//!   stream back as `text/event-stream`.
//! - `GET /v1/history/{thread_id}`: thread history with tool results folded
//!   into their calls.

/// Router, shared state and CORS setup.
pub mod app;
/// Environment-driven relay configuration.
pub mod config;
/// Relay error type and its HTTP mapping.
pub mod error;
/// Process-wide logging setup.
pub mod observability;
/// Route handlers.
pub mod routes;

pub use app::{AppState, build_router};
pub use config::{RelayConfig, load_env_files};
pub use error::RelayError;
pub use observability::{LogSettings, init_observability, init_with};
