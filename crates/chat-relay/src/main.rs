use chat_relay::{AppState, RelayConfig, build_router, init_observability, load_env_files};
use chat_stream::http::HttpAgentClient;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    init_observability();

    let config = RelayConfig::from_env()?;
    let addr = config.socket_addr()?;
    let agent = HttpAgentClient::new(config.agent.clone())?;
    let router = build_router(AppState::new(agent, config.allowed_origin.clone()));

    info!(
        addr = %addr,
        agent = %config.agent.base_url,
        cors_origin = ?config.allowed_origin,
        "chat relay listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("chat relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
