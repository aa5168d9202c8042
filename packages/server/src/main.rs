//! Deployment orchestrator binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{ApiSettings, AppState, create_router};
use jobs::{Orchestrator, RuntimeConfig};

const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "server=info,api=info,jobs=info,storage=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind = std::env::var("ORCHESTRATOR_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid ORCHESTRATOR_BIND address '{bind}': {e}"))?;

    let config = RuntimeConfig::from_env()?;
    tracing::info!(
        "Snapshots in {}, {} worker(s)",
        config.snapshot.dir.display(),
        config.max_workers
    );
    let orchestrator = Arc::new(Orchestrator::start(config).await?);

    let state = Arc::new(AppState::load(orchestrator.clone(), ApiSettings::from_env()).await);
    let app = create_router(state);

    tracing::info!("Starting deployment orchestrator at http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
