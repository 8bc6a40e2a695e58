use investment_orchestrator::{
    classifier::KeywordIntentClassifier,
    config::OrchestratorConfig,
    llm::CannedGenerator,
    models::{InvestmentRequest, OrchestrationResponse},
    orchestrator::Orchestrator,
    stages::{create_default_registry, StaticQuoteProvider},
};
use std::sync::Arc;
use tracing::info;

const SAMPLE_REQUESTS: &[&str] = &[
    "I'm 30 years old and want to start investing for retirement",
    "Build me an aggressive portfolio",
    "How is Tesla stock performing?",
    "What is compound interest?",
];

/// Offline stand-in for the model so the demo runs without Ollama
fn demo_generator() -> CannedGenerator {
    CannedGenerator::new("Investing regularly in diversified, low-cost funds is a sound default.")
        .with_rule(
            "investment profile analyzer",
            "RISK_TOLERANCE: moderate\nINVESTMENT_HORIZON: long\nAGE_RANGE: young\n\
             INCOME_LEVEL: medium\nINVESTMENT_GOALS: [retirement]\n\
             REASONING: Early-career saver with a long runway.",
        )
        .with_rule(
            "equity research analyst",
            "THESIS: Oversold after a sharp pullback.\nRISKS: Margin pressure.\n\
             OPPORTUNITIES: Energy storage growth.\nRECOMMENDATION: HOLD\nCONFIDENCE: 60%",
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Investment Orchestrator demo starting");

    let registry = create_default_registry(
        Arc::new(demo_generator()),
        Arc::new(StaticQuoteProvider::with_sample_data()),
    );
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(KeywordIntentClassifier),
        registry,
    )?;

    for message in SAMPLE_REQUESTS {
        info!(message = %message, "Running orchestrator");

        match orchestrator.invoke(InvestmentRequest::new(*message)).await? {
            OrchestrationResponse::Completed(ctx) => {
                println!("\n=== {} ===", message);
                println!("Intent: {} ({:.2})", ctx.header.intent, ctx.header.confidence);
                if let Some(output) = ctx.output() {
                    println!("{}", output.summary());
                }
            }
            OrchestrationResponse::Fallback(fallback) => {
                println!("\n=== {} ===", message);
                println!("[degraded] {}", fallback.response);
            }
        }
    }

    let health = orchestrator.health_status();
    println!("\n=== HEALTH ===");
    println!("{}", serde_json::to_string_pretty(&health)?);

    Ok(())
}
