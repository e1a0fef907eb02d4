//! HTTP agent transport.
//!
//! Speaks the agent's streaming endpoint and history endpoint with reqwest.
//! The relay reuses the same client to forward browser submissions.
mod client;
mod config;

pub use client::HttpAgentClient;
pub use config::HttpAgentConfig;
