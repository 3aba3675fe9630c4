use anyhow::Result;
use dagcalc::{
    agent::{client::OrchestratorClient, AgentPool},
    config::Config,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    info!(
        "starting dagcalc agent against {}",
        config.agent.orchestrator_url
    );

    let client = OrchestratorClient::new(&config.agent.orchestrator_url);
    let pool = AgentPool::new(client, config.agent.computing_power);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    pool.run(shutdown_rx).await;
    Ok(())
}
