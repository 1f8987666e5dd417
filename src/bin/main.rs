use investment_research_agent::{bootstrap, AgentConfig};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(ticker) = args.next() else {
        eprintln!("Usage: researcher <TICKER> [context...]");
        return ExitCode::from(2);
    };
    let user_context = args.collect::<Vec<_>>().join(" ");

    let orchestrator = match bootstrap::build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "Could not build the research agent");
            return ExitCode::FAILURE;
        }
    };

    info!(ticker = %ticker, "Investment research agent starting");

    match orchestrator.research_stock(&ticker, &user_context).await {
        Ok(result) => {
            println!("\n=== RESEARCH RESULT: {} ===", result.ticker);
            println!("Run: {} ({} ms)", result.run_id, result.execution_time_ms);

            println!("\nPlan ({}):", result.plan.complexity);
            for (i, step) in result.plan.steps.iter().enumerate() {
                println!("  {}. [{}] {}", i + 1, step.capability, step.description);
            }

            println!("\nTools:");
            for record in &result.tool_invocations {
                let outcome = match (&record.output_ref, &record.error) {
                    (_, Some(err)) => format!("FAILED: {}", err),
                    (Some(out), None) => out.clone(),
                    (None, None) => "ok".to_string(),
                };
                println!("  {} ({} ms): {}", record.tool, record.duration_ms, outcome);
            }

            if let Some(summary) = &result.findings.graph_summary {
                println!("\nKnowledge graph:\n{}", summary);
            }

            match &result.analysis_text {
                Some(text) => println!("\n{}", text),
                None => println!("\nNo analysis was produced."),
            }

            let r = &result.reflection;
            println!(
                "\nReflection: completeness {:.0}, confidence {:.0}, data quality {:.0}",
                r.completeness, r.confidence, r.data_quality
            );
            for rec in &r.recommendations {
                println!("  - {}", rec);
            }
            if !result.learned {
                println!("(learnings were not recorded)");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Research failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
