use anyhow::Result;
use analytics_service::{config::AppConfig, file_source, metrics_server, observability, pipeline::RunStatus, Orchestrator};
use std::time::Duration;

async fn cycle(orchestrator: &Orchestrator) -> Result<()> {
    let result = orchestrator.run_analysis(None).await;
    if result.status == RunStatus::Error {
        tracing::warn!(reason = ?result.message, "analysis cycle produced no forecast");
    }

    let snapshot = orchestrator.kpi_snapshot(None, None).await?;
    tracing::info!(snapshot = %serde_json::to_string(&snapshot)?, "kpi snapshot");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let orchestrator = analytics_service::connect(&cfg).await?;

    if let Some(ingest) = &cfg.ingest {
        let report = orchestrator.ingest(file_source(ingest).as_ref()).await;
        tracing::info!(
            path = %ingest.path.display(),
            status = ?report.status,
            raw = report.raw_records,
            malformed = report.malformed_records,
            clean = report.clean_records,
            reason = ?report.message,
            "ingest finished"
        );
    }

    let Some(interval_secs) = cfg.analytics.interval_secs else {
        return cycle(&orchestrator).await;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = cycle(&orchestrator).await {
                    tracing::error!(error = %e, "analysis cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
        }
    }
}
