use std::net::SocketAddr;
use std::sync::Arc;

use gateway::auth::AuthCache;
use gateway::config::Settings;
use gateway::crypto::HmacSigner;
use gateway::http_client::build_upstream_client;
use gateway::providers::zai::{UpstreamGatewayClient, ZaiImageUploader};
use gateway::server::{AppState, create_app};
use gateway::tokenizer::TiktokenCounter;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env 可选
    let _ = dotenvy::dotenv();

    let settings = Arc::new(Settings::load()?);
    init_tracing(settings.server.debug);

    let http = build_upstream_client()?;
    let upstream = UpstreamGatewayClient::new(
        http.clone(),
        settings.clone(),
        Arc::new(AuthCache::new(http.clone())),
        Arc::new(HmacSigner::with_override(
            settings.upstream.signing_secret.as_deref(),
        )),
        Arc::new(ZaiImageUploader::new(http, settings.clone())),
    );

    let state = AppState::new(
        settings.clone(),
        Arc::new(upstream),
        Arc::new(TiktokenCounter::new()),
    );
    let _sweeper = state.limiter.spawn_sweeper();
    let app = create_app(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        upstream = %settings.upstream.origin(),
        model = %settings.model.default,
        think_mode = %settings.model.think_mode,
        anonymous = settings.upstream.anonymous,
        rate_limit = settings.server.rate_limit_per_minute,
        "Gateway server running on http://{}",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
