//! Short-horizon daily consumption forecasting.
//!
//! [`ForecastStrategy`] is the seam the orchestrator depends on; the baseline
//! implementation is a random walk around the window mean with a fixed
//! confidence band.

use std::{collections::BTreeMap, sync::Mutex};

use energy_client::domain::{ForecastPoint, NormalizedReading};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};

use crate::{kpi::round2, pipeline::PipelineError};

pub const DEFAULT_JITTER: f64 = 0.05;
pub const DEFAULT_BAND: f64 = 0.10;

pub trait ForecastStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce exactly `horizon` daily points starting the day after `today`.
    fn forecast(
        &self,
        window: &[NormalizedReading],
        horizon: u32,
        today: Date,
    ) -> Result<Vec<ForecastPoint>, PipelineError>;
}

/// Longest horizon a single forecast may request.
pub const MAX_HORIZON_DAYS: u32 = 366;

/// UTC midnights of the `horizon` days following `today`.
pub fn forecast_days(today: Date, horizon: u32) -> Result<Vec<OffsetDateTime>, PipelineError> {
    let start = today.with_time(Time::MIDNIGHT).assume_utc();
    (1..=i64::from(horizon))
        .map(|d| {
            start.checked_add(Duration::days(d)).ok_or_else(|| {
                PipelineError::InvalidArgument(format!("forecast day {d} after {today} is out of range"))
            })
        })
        .collect()
}

fn check_request(window: &[NormalizedReading], horizon: u32) -> Result<(), PipelineError> {
    if horizon == 0 {
        return Err(PipelineError::InvalidArgument("forecast horizon must be at least 1".to_string()));
    }
    if horizon > MAX_HORIZON_DAYS {
        return Err(PipelineError::InvalidArgument(format!(
            "forecast horizon {horizon} exceeds {MAX_HORIZON_DAYS} days"
        )));
    }
    if window.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no normalized readings in the forecast window".to_string(),
        ));
    }
    Ok(())
}

/// `predicted = mean * (1 + U)`, `U ~ Uniform[-jitter, jitter]` per day, with
/// bounds fixed at `mean * (1 ± band)`.
///
/// The band is not derived from the window's variance, and a large enough
/// jitter can push `predicted` outside it.
pub struct BaselineForecaster<R = StdRng> {
    rng: Mutex<R>,
    jitter: f64,
    band: f64,
}

impl BaselineForecaster<StdRng> {
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore + Send> BaselineForecaster<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
            jitter: DEFAULT_JITTER,
            band: DEFAULT_BAND,
        }
    }

    pub fn with_spread(mut self, jitter: f64, band: f64) -> Self {
        self.jitter = jitter.abs();
        self.band = band;
        self
    }
}

impl<R: RngCore + Send> ForecastStrategy for BaselineForecaster<R> {
    fn name(&self) -> &'static str {
        "baseline_mean"
    }

    fn forecast(
        &self,
        window: &[NormalizedReading],
        horizon: u32,
        today: Date,
    ) -> Result<Vec<ForecastPoint>, PipelineError> {
        check_request(window, horizon)?;
        if !(self.jitter.is_finite() && self.band.is_finite()) {
            return Err(PipelineError::InvalidArgument(format!(
                "forecast spread must be finite (jitter {}, band {})",
                self.jitter, self.band
            )));
        }
        let days = forecast_days(today, horizon)?;

        let mean = window.iter().map(|r| r.power_kwh).sum::<f64>() / window.len() as f64;
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let points = days
            .into_iter()
            .map(|timestamp| {
                let offset: f64 = rng.gen_range(-self.jitter..=self.jitter);
                ForecastPoint {
                    timestamp,
                    predicted_kwh: mean * (1.0 + offset),
                    confidence_lower: mean * (1.0 - self.band),
                    confidence_upper: mean * (1.0 + self.band),
                }
            })
            .collect();

        Ok(points)
    }
}

/// How well stored forecasts matched what was later measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastAccuracy {
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
    /// Root-mean-square error, in kWh.
    pub rmse: f64,
    pub compared_days: usize,
}

/// Compare forecast points against the daily mean of actual readings.
///
/// Points are matched by UTC calendar day. `None` when no day overlaps.
pub fn accuracy(forecast: &[ForecastPoint], actual: &[NormalizedReading]) -> Option<ForecastAccuracy> {
    let mut daily: BTreeMap<Date, (f64, usize)> = BTreeMap::new();
    for r in actual {
        let entry = daily.entry(r.timestamp.to_offset(UtcOffset::UTC).date()).or_insert((0.0, 0));
        entry.0 += r.power_kwh;
        entry.1 += 1;
    }

    let pairs: Vec<(f64, f64)> = forecast
        .iter()
        .filter_map(|p| {
            let (sum, count) = daily.get(&p.timestamp.to_offset(UtcOffset::UTC).date())?;
            Some((sum / *count as f64, p.predicted_kwh))
        })
        .collect();

    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let mape = pairs.iter().map(|(y, yhat)| ((y - yhat) / y).abs()).sum::<f64>() / n * 100.0;
    let rmse = (pairs.iter().map(|(y, yhat)| (y - yhat).powi(2)).sum::<f64>() / n).sqrt();

    Some(ForecastAccuracy {
        mape: round2(mape),
        rmse: round2(rmse),
        compared_days: pairs.len(),
    })
}
