use std::net::SocketAddr;
use std::sync::Arc;

use console_bridge::{CommandCompiler, ConsoleBridge, DockerClient};
use console_gateway::config::AppConfig;
use console_gateway::routes::build_router;
use console_gateway::state::AppState;
use console_gateway::telemetry::init_tracing;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env()?;
    init_tracing(&cfg.log_filter);

    let docker = Arc::new(DockerClient::from_host(&cfg.docker_host)?);
    info!(endpoint = %docker.endpoint(), "using container runtime");

    let bridge = ConsoleBridge::with_runtime(
        CommandCompiler::new(cfg.compiler_config()),
        docker,
        cfg.exec_settings(),
    )
    .with_receipt_polling(cfg.receipt_polling());

    let app = build_router(AppState::new(bridge))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = cfg.bind_addr.parse()?;
    info!("starting console gateway on {addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
