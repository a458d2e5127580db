use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use gridforce_orchestrator::config::{Cli, OrchestratorConfig};
use gridforce_orchestrator::settlement::{RpcSettlement, Settlement};
use gridforce_orchestrator::store::{self, MemoryStore, PostgresStore, Store};
use gridforce_orchestrator::telemetry::Telemetry;
use gridforce_orchestrator::{build_router, AppState, StaticDirs};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let telemetry = Telemetry::init()?;

    let config = OrchestratorConfig::try_from(Cli::parse())?;
    info!(
        listen_addr = %config.listen_addr,
        database = config.database_url.is_some(),
        rpc_url = %config.settlement.rpc_url,
        "starting gridforce orchestrator"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => PostgresStore::connect(url)
            .await
            .context("failed to connect to database")?,
        None => {
            warn!("no database configured; running with in-memory storage");
            MemoryStore::new()
        }
    };
    if store::seed_demo_customer(store.as_ref())
        .await
        .context("failed to seed demo customer")?
    {
        info!(api_key = store::DEMO_API_KEY, "seeded demo customer");
    }

    let settlement: Option<Arc<dyn Settlement>> =
        match RpcSettlement::connect(config.settlement.clone()).await {
            Ok(client) => Some(Arc::new(client)),
            Err(err) => {
                warn!(error = %err, "settlement client unavailable; rewards will not be minted");
                None
            }
        };

    let state = AppState::new(store, settlement)
        .with_metrics(telemetry.metrics_handle())
        .with_outbound_buffer(config.outbound_buffer);
    let dirs = StaticDirs {
        web: existing_dir(config.web_dir.clone()),
        downloads: existing_dir(config.downloads_dir.clone()),
    };
    let router = build_router(state, dirs);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("gridforce orchestrator listening on {}", config.listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server shutdown with error")?;

    info!("shutdown complete");
    Ok(())
}

fn existing_dir(path: PathBuf) -> Option<PathBuf> {
    if path.is_dir() {
        Some(path)
    } else {
        info!(path = %path.display(), "static directory missing; not serving it");
        None
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
