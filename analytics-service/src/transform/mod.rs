use std::sync::Arc;

use energy_client::domain::{NormalizedReading, RawReading};

use crate::{
    pipeline::{Envelope, PipelineError},
    sinks::AnalyticsStore,
};

/// Derive efficiency metrics for one reading.
///
/// Rules:
/// - readings with `load_percent <= 0` or `power_kwh <= 0` are dropped, since
///   both ratios divide by one of them.
/// - `efficiency = load_percent / power_kwh * 100`
/// - `specific_consumption = power_kwh / load_percent`
///
/// Values are left unrounded. `is_outlier` always starts out `false`.
pub fn normalize_reading(raw: &RawReading) -> Option<NormalizedReading> {
    if !(raw.load_percent > 0.0 && raw.power_kwh > 0.0) {
        return None;
    }

    Some(NormalizedReading {
        timestamp: raw.timestamp,
        installation_id: raw.installation_id.clone(),
        power_kwh: raw.power_kwh,
        load_percent: raw.load_percent,
        temperature: raw.temperature,
        pressure: raw.pressure,
        efficiency: raw.load_percent / raw.power_kwh * 100.0,
        specific_consumption: raw.power_kwh / raw.load_percent,
        is_outlier: false,
    })
}

/// Normalize a batch, dropping readings that fail the positivity guard.
pub fn normalize_batch<'a, I>(readings: I) -> Vec<NormalizedReading>
where
    I: IntoIterator<Item = &'a RawReading>,
{
    readings.into_iter().filter_map(normalize_reading).collect()
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub archived_count: u64,
    pub persisted_count: u64,
    pub normalized: Vec<NormalizedReading>,
}

impl NormalizeOutcome {
    pub fn dropped_count(&self) -> u64 {
        self.archived_count.saturating_sub(self.normalized.len() as u64)
    }
}

/// ETL stage: archive raw readings, derive metrics, persist the clean set.
pub struct Normalizer<S: ?Sized> {
    store: Arc<S>,
}

impl<S: AnalyticsStore + ?Sized> Normalizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Archive every reading verbatim, then store the normalized subset.
    ///
    /// The archive is written first so raw data survives even when the clean
    /// write fails.
    pub async fn normalize(&self, readings: &[Envelope<RawReading>]) -> Result<NormalizeOutcome, PipelineError> {
        if readings.is_empty() {
            return Ok(NormalizeOutcome::default());
        }

        let archived_count = self.store.archive_raw(readings).await?;
        metrics::counter!("raw_readings_archived_total").increment(archived_count);

        let normalized = normalize_batch(readings.iter().map(|e| &e.payload));
        let dropped = readings.len() - normalized.len();
        if dropped > 0 {
            metrics::counter!("normalized_readings_dropped_total").increment(dropped as u64);
            tracing::debug!(dropped, "dropped readings with non-positive power or load");
        }

        let persisted_count = if normalized.is_empty() {
            0
        } else {
            self.store.insert_normalized(&normalized).await?
        };

        tracing::info!(
            raw = readings.len(),
            normalized = normalized.len(),
            persisted = persisted_count,
            "normalization finished"
        );

        Ok(NormalizeOutcome {
            archived_count,
            persisted_count,
            normalized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{MemoryStore, Table};
    use time::macros::datetime;

    fn raw(power_kwh: f64, load_percent: f64) -> RawReading {
        RawReading {
            timestamp: datetime!(2025-01-01 00:00:00 UTC),
            installation_id: "INST_001".to_string(),
            power_kwh,
            load_percent,
            temperature: Some(15.0),
            pressure: None,
        }
    }

    #[test]
    fn derives_efficiency_and_specific_consumption() {
        let n = normalize_reading(&raw(120.0, 60.0)).unwrap();
        assert_eq!(n.efficiency, 60.0 / 120.0 * 100.0);
        assert_eq!(n.specific_consumption, 120.0 / 60.0);
        assert_eq!(n.temperature, Some(15.0));
        assert!(!n.is_outlier);
    }

    #[test]
    fn keeps_full_precision() {
        let n = normalize_reading(&raw(3.0, 1.0)).unwrap();
        assert_eq!(n.efficiency, 1.0 / 3.0 * 100.0);
    }

    #[test]
    fn drops_non_positive_power_or_load() {
        assert!(normalize_reading(&raw(0.0, 50.0)).is_none());
        assert!(normalize_reading(&raw(-1.0, 50.0)).is_none());
        assert!(normalize_reading(&raw(100.0, 0.0)).is_none());
        assert!(normalize_reading(&raw(100.0, -5.0)).is_none());
    }

    #[test]
    fn batch_never_grows_and_only_keeps_positive_rows() {
        let batch = vec![raw(100.0, 50.0), raw(0.0, 50.0), raw(80.0, 0.0), raw(90.0, 45.0)];
        let normalized = normalize_batch(&batch);
        assert!(normalized.len() <= batch.len());
        assert_eq!(normalized.len(), 2);
        for n in &normalized {
            assert!(n.load_percent > 0.0 && n.power_kwh > 0.0);
            assert_eq!(n.efficiency, n.load_percent / n.power_kwh * 100.0);
        }
    }

    #[tokio::test]
    async fn archives_every_reading_before_filtering() {
        let store = Arc::new(MemoryStore::new());
        let normalizer = Normalizer::new(store.clone());
        let batch: Vec<_> = [raw(100.0, 50.0), raw(0.0, 50.0), raw(120.0, 60.0)]
            .into_iter()
            .map(Envelope::now)
            .collect();

        let outcome = normalizer.normalize(&batch).await.unwrap();

        assert_eq!(outcome.archived_count, 3);
        assert_eq!(outcome.persisted_count, 2);
        assert_eq!(outcome.dropped_count(), 1);
        assert_eq!(store.raw().len(), 3);
        assert_eq!(store.clean().len(), 2);
    }

    #[tokio::test]
    async fn raw_archive_survives_clean_write_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(Table::CleanData);
        let normalizer = Normalizer::new(store.clone());
        let batch = vec![Envelope::now(raw(100.0, 50.0))];

        let err = normalizer.normalize(&batch).await.unwrap_err();

        assert!(matches!(err, PipelineError::Persistence(_)));
        assert_eq!(store.raw().len(), 1);
        assert!(store.clean().is_empty());
    }
}
