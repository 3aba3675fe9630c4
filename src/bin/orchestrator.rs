use anyhow::Result;
use dagcalc::{
    api::ApiServer, config::Config, orchestrator::OrchestratorService,
    repository::MemoryRepository,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting dagcalc orchestrator");

    let config = Config::load();
    let repository = Arc::new(MemoryRepository::new());
    let service = Arc::new(OrchestratorService::new(&config, repository));
    let api_server = ApiServer::new(config.http.clone(), service);

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("orchestrator server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
