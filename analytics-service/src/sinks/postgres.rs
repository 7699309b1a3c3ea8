use std::{future::Future, time::Duration};

use energy_client::{
    db::readings,
    domain::{AnomalyRecord, ForecastPoint, NormalizedReading, RawReading},
};
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{raw_record_id, AnalyticsStore};
use crate::pipeline::{Envelope, PipelineError};

/// `AnalyticsStore` backed by a Postgres-wire database.
///
/// Writes are chunked into multi-row `INSERT`s of at most `batch_size` rows
/// and retried with linear backoff. Each chunk commits on its own.
pub struct PgAnalyticsStore {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn execute_with_retry<F, Fut>(&self, table: &'static str, mut op: F) -> Result<u64, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<u64, sqlx::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let started = std::time::Instant::now();
            match op().await {
                Ok(rows) => {
                    metrics::histogram!("store_write_latency_seconds", "table" => table)
                        .record(started.elapsed().as_secs_f64());
                    return Ok(rows);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        table,
                        attempt,
                        "store write failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, table, "store write failed, giving up");
                    metrics::counter!("store_errors_total", "table" => table).increment(1);
                    return Err(PipelineError::Persistence(format!("{table}: {e}")));
                }
            }
        }
    }

    async fn insert_raw_chunk(&self, chunk: &[Envelope<RawReading>]) -> Result<u64, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO raw_data (record_id, timestamp, installation_id, power_kwh, load_percent, temperature, pressure) ",
        );
        builder.push_values(chunk, |mut b, env| {
            let r = &env.payload;
            b.push_bind(raw_record_id(r))
                .push_bind(r.timestamp)
                .push_bind(&r.installation_id)
                .push_bind(r.power_kwh)
                .push_bind(r.load_percent)
                .push_bind(r.temperature)
                .push_bind(r.pressure);
        });
        let res = builder.build().execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_normalized_chunk(&self, chunk: &[NormalizedReading]) -> Result<u64, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO clean_data (timestamp, installation_id, power_kwh, load_percent, temperature, pressure, efficiency, specific_consumption, is_outlier) ",
        );
        builder.push_values(chunk, |mut b, r| {
            b.push_bind(r.timestamp)
                .push_bind(&r.installation_id)
                .push_bind(r.power_kwh)
                .push_bind(r.load_percent)
                .push_bind(r.temperature)
                .push_bind(r.pressure)
                .push_bind(r.efficiency)
                .push_bind(r.specific_consumption)
                .push_bind(r.is_outlier);
        });
        let res = builder.build().execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_forecast_chunk(&self, chunk: &[ForecastPoint]) -> Result<u64, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO forecast (timestamp, predicted_kwh, confidence_lower, confidence_upper) ",
        );
        builder.push_values(chunk, |mut b, p| {
            b.push_bind(p.timestamp)
                .push_bind(p.predicted_kwh)
                .push_bind(p.confidence_lower)
                .push_bind(p.confidence_upper);
        });
        let res = builder.build().execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_anomaly_chunk(&self, chunk: &[AnomalyRecord]) -> Result<u64, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO anomalies (timestamp, power_kwh, excess_kwh, cause, description) ",
        );
        builder.push_values(chunk, |mut b, a| {
            b.push_bind(a.timestamp)
                .push_bind(a.power_kwh)
                .push_bind(a.excess_kwh)
                .push_bind(a.cause.as_str())
                .push_bind(&a.description);
        });
        let res = builder.build().execute(&self.pool).await?;
        Ok(res.rows_affected())
    }
}

fn read_error(table: &str, e: anyhow::Error) -> PipelineError {
    metrics::counter!("store_errors_total", "table" => table.to_string()).increment(1);
    PipelineError::Persistence(format!("failed to read {table}: {e}"))
}

#[async_trait::async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    async fn archive_raw(&self, batch: &[Envelope<RawReading>]) -> Result<u64, PipelineError> {
        let mut written = 0;
        for chunk in batch.chunks(self.batch_size) {
            written += self
                .execute_with_retry("raw_data", || self.insert_raw_chunk(chunk))
                .await?;

            // Approximate end-to-end latency from earliest received_at to now.
            if let Some(min_received) = chunk.iter().map(|e| e.received_at).min() {
                if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                    metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
                }
            }
        }
        Ok(written)
    }

    async fn insert_normalized(&self, batch: &[NormalizedReading]) -> Result<u64, PipelineError> {
        let mut written = 0;
        for chunk in batch.chunks(self.batch_size) {
            written += self
                .execute_with_retry("clean_data", || self.insert_normalized_chunk(chunk))
                .await?;
        }
        Ok(written)
    }

    async fn insert_forecast(&self, points: &[ForecastPoint]) -> Result<u64, PipelineError> {
        let mut written = 0;
        for chunk in points.chunks(self.batch_size) {
            written += self
                .execute_with_retry("forecast", || self.insert_forecast_chunk(chunk))
                .await?;
        }
        Ok(written)
    }

    async fn insert_anomalies(&self, records: &[AnomalyRecord]) -> Result<u64, PipelineError> {
        let mut written = 0;
        for chunk in records.chunks(self.batch_size) {
            written += self
                .execute_with_retry("anomalies", || self.insert_anomaly_chunk(chunk))
                .await?;
        }
        Ok(written)
    }

    async fn normalized_since(&self, since: OffsetDateTime) -> Result<Vec<NormalizedReading>, PipelineError> {
        readings::normalized_since(&self.pool, since)
            .await
            .map_err(|e| read_error("clean_data", e))
    }

    async fn anomalies_since(&self, since: OffsetDateTime) -> Result<Vec<AnomalyRecord>, PipelineError> {
        readings::anomalies_since(&self.pool, since)
            .await
            .map_err(|e| read_error("anomalies", e))
    }

    async fn forecast_since(&self, since: OffsetDateTime) -> Result<Vec<ForecastPoint>, PipelineError> {
        readings::forecast_since(&self.pool, since)
            .await
            .map_err(|e| read_error("forecast", e))
    }
}
