use anyhow::{bail, Result};
use analytics_service::{
    config::{AppConfig, IngestConfig},
    file_source, observability,
    pipeline::RunStatus,
};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: ingest_readings <json|ndjson|csv file path>");
    }

    // Load configuration (can point ANALYTICS_CONFIG to an ingest-specific file).
    let cfg = AppConfig::load()?;
    let orchestrator = analytics_service::connect(&cfg).await?;

    let ingest = IngestConfig {
        path: args[1].clone().into(),
        format: None,
    };
    let report = orchestrator.ingest(file_source(&ingest).as_ref()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == RunStatus::Error {
        bail!(
            "ingest failed: {}",
            report.message.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}
