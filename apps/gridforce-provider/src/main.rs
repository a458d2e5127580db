mod client;
mod host;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use gridforce_protocol::BURN_ADDRESS;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::host::HostInfo;
use crate::runner::DockerRunner;

#[derive(Debug, Parser)]
#[command(
    name = "gridforce-provider",
    author,
    version,
    about = "GridForce provider agent: executes offered jobs in local containers"
)]
struct Cli {
    /// Orchestrator address, e.g. `10.0.0.2:8080`, an ngrok host or a full ws/wss URL.
    #[arg(long, env = "GRIDFORCE_SERVER", default_value = "127.0.0.1:8080")]
    server: String,

    /// Wallet credited with rewards.
    #[arg(long, env = "GRIDFORCE_WALLET", default_value = BURN_ADDRESS)]
    wallet: String,

    /// Device identifier reported to the orchestrator.
    #[arg(long, env = "GRIDFORCE_DEVICE_ID", default_value = "gpu-node-01")]
    device_id: String,

    /// Pin the Docker API version (e.g. `1.44`) instead of negotiating it.
    #[arg(long)]
    docker_api_version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    let cli = Cli::parse();
    let host = HostInfo::detect();
    let auth = host.auth_payload(&cli.device_id, &cli.wallet);
    let url = client::server_url(&cli.server);
    info!(
        url = %url,
        device_id = %cli.device_id,
        wallet = %cli.wallet,
        specs = %auth.capabilities_summary(),
        "starting gridforce provider"
    );

    let runner = DockerRunner::connect(cli.docker_api_version.as_deref())
        .await
        .context("failed to connect to docker")?;

    client::run(&url, &auth, &runner, async {
        let _ = signal::ctrl_c().await;
    })
    .await
    .with_context(|| format!("provider session with {url} failed"))?;

    info!("provider stopped");
    Ok(())
}
