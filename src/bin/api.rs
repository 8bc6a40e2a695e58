use investment_orchestrator::{
    api::start_server,
    config::OrchestratorConfig,
    monitoring::ProcfsProbe,
    orchestrator::Orchestrator,
    stages::StaticQuoteProvider,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads .env before the process environment
    let config = OrchestratorConfig::from_env().map_err(|e| {
        eprintln!("Refusing to start: {}", e);
        e
    })?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Investment Orchestrator - API Server");
    info!(
        port = config.port,
        environment = %config.environment,
        model = %config.ollama_model,
        "Configuration loaded"
    );

    let port = config.port;
    let orchestrator = Arc::new(Orchestrator::from_config(
        config,
        Arc::new(StaticQuoteProvider::with_sample_data()),
    )?);

    let sampler = orchestrator.start_sampler(Arc::new(ProcfsProbe::new()));

    info!("Orchestrator initialized, starting API server");

    let result = start_server(orchestrator, port).await;
    if let Err(e) = &result {
        error!(error = %e, "API server stopped");
    }

    sampler.stop().await;
    result
}
