pub mod anomaly;
pub mod config;
pub mod forecast;
pub mod kpi;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use energy_client::domain::RawReading;
use sqlx::postgres::PgPoolOptions;

use config::{AppConfig, IngestConfig, IngestFormat};
use pipeline::Source;
use sinks::PgAnalyticsStore;
use sources::{RawReadingCsvFileSource, RawReadingJsonFileSource};

pub use pipeline::{AnalysisResult, Envelope, IngestReport, Orchestrator, PipelineError};

/// Connect to the configured database and build an orchestrator over it.
pub async fn connect(cfg: &AppConfig) -> Result<Orchestrator> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let store = PgAnalyticsStore::new(
        pool,
        cfg.store.batch_size,
        cfg.store.max_retries,
        Duration::from_millis(cfg.store.retry_backoff_ms),
    );

    Ok(Orchestrator::new(Arc::new(store), cfg.analytics.clone()))
}

/// File source matching the ingest configuration.
pub fn file_source(ingest: &IngestConfig) -> Box<dyn Source<RawReading>> {
    match ingest.resolved_format() {
        IngestFormat::Json => Box::new(RawReadingJsonFileSource::new(&ingest.path)),
        IngestFormat::Csv => Box::new(RawReadingCsvFileSource::new(&ingest.path)),
    }
}
