/// Liveness probe.
pub mod health;
/// Resolved thread history.
pub mod history;
/// Submission relay to the agent event stream.
pub mod stream;
