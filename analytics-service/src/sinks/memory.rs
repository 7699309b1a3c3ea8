use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use energy_client::domain::{AnomalyRecord, ForecastPoint, NormalizedReading, RawReading};
use time::OffsetDateTime;

use super::AnalyticsStore;
use crate::pipeline::{Envelope, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    RawData,
    CleanData,
    Forecast,
    Anomalies,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::RawData => "raw_data",
            Self::CleanData => "clean_data",
            Self::Forecast => "forecast",
            Self::Anomalies => "anomalies",
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    raw: Vec<RawReading>,
    clean: Vec<NormalizedReading>,
    forecast: Vec<ForecastPoint>,
    anomalies: Vec<AnomalyRecord>,
    failing: HashSet<Table>,
}

/// Process-local store for dry runs and tests.
///
/// Tables can be switched into a failing state to exercise persistence
/// failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent write to `table` fail.
    pub fn fail_on(&self, table: Table) {
        self.tables().failing.insert(table);
    }

    pub fn raw(&self) -> Vec<RawReading> {
        self.tables().raw.clone()
    }

    pub fn clean(&self) -> Vec<NormalizedReading> {
        self.tables().clean.clone()
    }

    pub fn forecast(&self) -> Vec<ForecastPoint> {
        self.tables().forecast.clone()
    }

    pub fn anomalies(&self) -> Vec<AnomalyRecord> {
        self.tables().anomalies.clone()
    }

    fn check(tables: &Tables, table: Table) -> Result<(), PipelineError> {
        if tables.failing.contains(&table) {
            return Err(PipelineError::Persistence(format!(
                "{}: write rejected",
                table.name()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for MemoryStore {
    async fn archive_raw(&self, batch: &[Envelope<RawReading>]) -> Result<u64, PipelineError> {
        let mut t = self.tables();
        Self::check(&t, Table::RawData)?;
        t.raw.extend(batch.iter().map(|e| e.payload.clone()));
        Ok(batch.len() as u64)
    }

    async fn insert_normalized(&self, batch: &[NormalizedReading]) -> Result<u64, PipelineError> {
        let mut t = self.tables();
        Self::check(&t, Table::CleanData)?;
        t.clean.extend_from_slice(batch);
        Ok(batch.len() as u64)
    }

    async fn insert_forecast(&self, points: &[ForecastPoint]) -> Result<u64, PipelineError> {
        let mut t = self.tables();
        Self::check(&t, Table::Forecast)?;
        t.forecast.extend_from_slice(points);
        Ok(points.len() as u64)
    }

    async fn insert_anomalies(&self, records: &[AnomalyRecord]) -> Result<u64, PipelineError> {
        let mut t = self.tables();
        Self::check(&t, Table::Anomalies)?;
        t.anomalies.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn normalized_since(&self, since: OffsetDateTime) -> Result<Vec<NormalizedReading>, PipelineError> {
        let mut rows: Vec<_> = self
            .tables()
            .clean
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn anomalies_since(&self, since: OffsetDateTime) -> Result<Vec<AnomalyRecord>, PipelineError> {
        let mut rows: Vec<_> = self
            .tables()
            .anomalies
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn forecast_since(&self, since: OffsetDateTime) -> Result<Vec<ForecastPoint>, PipelineError> {
        let mut rows: Vec<_> = self
            .tables()
            .forecast
            .iter()
            .filter(|p| p.timestamp >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.timestamp);
        Ok(rows)
    }
}
