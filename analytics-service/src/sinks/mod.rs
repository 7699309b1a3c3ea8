use energy_client::domain::{AnomalyRecord, ForecastPoint, NormalizedReading, RawReading};
use time::OffsetDateTime;

use crate::pipeline::{Envelope, PipelineError};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, Table};
pub use postgres::PgAnalyticsStore;

/// Append-only persistence used by the pipeline.
///
/// Each write is independent: a failure in one call leaves rows committed by
/// earlier calls in place. Writes return the number of rows stored.
#[async_trait::async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn archive_raw(&self, batch: &[Envelope<RawReading>]) -> Result<u64, PipelineError>;

    async fn insert_normalized(&self, batch: &[NormalizedReading]) -> Result<u64, PipelineError>;

    async fn insert_forecast(&self, points: &[ForecastPoint]) -> Result<u64, PipelineError>;

    async fn insert_anomalies(&self, records: &[AnomalyRecord]) -> Result<u64, PipelineError>;

    /// Normalized readings with `timestamp >= since`, oldest first.
    async fn normalized_since(&self, since: OffsetDateTime) -> Result<Vec<NormalizedReading>, PipelineError>;

    async fn anomalies_since(&self, since: OffsetDateTime) -> Result<Vec<AnomalyRecord>, PipelineError>;

    async fn forecast_since(&self, since: OffsetDateTime) -> Result<Vec<ForecastPoint>, PipelineError>;
}

/// Content hash identifying an archived raw reading.
///
/// Fields are length/presence-prefixed so adjacent values cannot collide.
pub fn raw_record_id(r: &RawReading) -> String {
    fn hash_str(h: &mut blake3::Hasher, s: &str) {
        h.update(&(s.len() as u32).to_le_bytes());
        h.update(s.as_bytes());
    }

    fn hash_opt_f64(h: &mut blake3::Hasher, v: Option<f64>) {
        match v {
            Some(x) => {
                h.update(&[1]);
                h.update(&x.to_bits().to_le_bytes());
            }
            None => {
                h.update(&[0]);
            }
        }
    }

    let mut h = blake3::Hasher::new();
    h.update(&r.timestamp.unix_timestamp_nanos().to_le_bytes());
    hash_str(&mut h, &r.installation_id);
    h.update(&r.power_kwh.to_bits().to_le_bytes());
    h.update(&r.load_percent.to_bits().to_le_bytes());
    hash_opt_f64(&mut h, r.temperature);
    hash_opt_f64(&mut h, r.pressure);
    h.finalize().to_hex().to_string()
}
