use anyhow::{Context, Result};
use analytics_service::{config::AppConfig, observability};
use std::env;

/// Print the KPI snapshot for a trailing window as JSON.
///
/// usage: kpi_report [period_days] [optimization_percent]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let mut args = env::args().skip(1);
    let period_days = args
        .next()
        .map(|s| s.parse::<u32>().with_context(|| format!("invalid period_days '{s}'")))
        .transpose()?;
    let optimization_percent = args
        .next()
        .map(|s| s.parse::<f64>().with_context(|| format!("invalid optimization_percent '{s}'")))
        .transpose()?;

    let cfg = AppConfig::load()?;
    let orchestrator = analytics_service::connect(&cfg).await?;

    let snapshot = orchestrator.kpi_snapshot(period_days, optimization_percent).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    tracing::info!(
        period_days = snapshot.period_days,
        price = orchestrator.config().energy_price_per_kwh,
        "kpi report generated"
    );

    Ok(())
}
