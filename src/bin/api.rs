use investment_research_agent::{api::start_server, bootstrap, AgentConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    info!("Investment Research Agent - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(bootstrap::build_orchestrator(&config)?);
    info!(memory = orchestrator.memory_backend(), "Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
