//! Gateway binary: loads configuration, wires the shared engine state,
//! starts the warm-keeper, and serves the duplex voice endpoint until a
//! shutdown signal arrives.

use axum::Router;
use axum::routing::get;
use sofra::persistence::{InMemoryStore, MenuAndOrderStore};
use sofra::warmkeeper::WarmKeeper;
use sofra::ws::driver::voice_handler;
use sofra::ws::GatewayState;
use sofra::EngineConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sofra=info,tower_http=info")),
        )
        .init();

    let config = EngineConfig::from_env().map_err(|error| {
        tracing::error!(%error, "sofra-gateway refused to start");
        anyhow::anyhow!("configuration error: {error}")
    })?;

    let bind_addr = config.bind_addr.clone();
    let warm_keeper_config = config.warm_keeper;

    // Production deployments supply their own `MenuAndOrderStore`; this
    // in-memory stub stands in for the out-of-scope collaborator so the
    // gateway is runnable standalone (spec §1 "explicitly out of scope").
    let persistence: Arc<dyn MenuAndOrderStore> = Arc::new(InMemoryStore::new(Default::default()));

    let state = GatewayState::new(config, persistence);

    let mut warm_keeper = WarmKeeper::new(
        state.stt.clone(),
        state.tts.clone(),
        warm_keeper_config.interval,
    );
    warm_keeper.start();

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/voice/{qr_token}", get(voice_handler))
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "sofra-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    warm_keeper.stop().await;
    tracing::info!("sofra-gateway shut down cleanly");
    Ok(())
}

async fn healthz() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing the SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing the SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight sessions");
}
