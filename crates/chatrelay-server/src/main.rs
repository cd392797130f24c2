mod config;
mod error;
mod proxy;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use axum::http::{Method, header};
use chatrelay_core::RelayService;
use config::ServerConfig;
use proxy::{AppState, relay_router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatrelay_server=debug,chatrelay_core=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let config = ServerConfig::load()?;
    tracing::info!(
        upstream = %config.relay.upstream_base_url,
        mode = %config.relay.output_mode,
        "Starting ChatRelay server"
    );

    let service = Arc::new(RelayService::new(config.relay.clone())?);

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = relay_router(AppState {
        service,
        max_body_bytes: config.max_body_bytes,
    })
    .layer(cors);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("ChatRelay listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("ChatRelay shutting down");
        })
        .await?;

    Ok(())
}
