//! Energy performance KPIs over a trailing window.
//!
//! Every computation checks for an empty window first and reports
//! [`KpiOutcome::NoData`] instead of failing. Results are rounded for
//! presentation (2 dp for kWh, currency and percentages, 4 dp for ratios);
//! intermediate values keep full precision.

use energy_client::domain::{AnomalyRecord, ForecastPoint, NormalizedReading};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::pipeline::PipelineError;

pub const DEFAULT_ENERGY_PRICE_PER_KWH: f64 = 5.0;
pub const DEFAULT_PERIOD_DAYS: u32 = 30;
pub const DEFAULT_OPTIMIZATION_PERCENT: f64 = 1.0;

/// Placeholder baseline: current ENPI plus 5%.
const BASELINE_ENPI_FACTOR: f64 = 1.05;
const DAYS_PER_YEAR: f64 = 365.0;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    // `+ 0.0` turns a rounded -0.0 into 0.0
    (value * factor).round() / factor + 0.0
}

pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round4(value: f64) -> f64 {
    round_to(value, 4)
}

/// Start of the trailing `period_days` window ending at `now`.
pub fn window_start(now: OffsetDateTime, period_days: u32) -> Result<OffsetDateTime, PipelineError> {
    now.checked_sub(Duration::days(i64::from(period_days))).ok_or_else(|| {
        PipelineError::InvalidArgument(format!("period of {period_days} days reaches past the supported date range"))
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KpiOutcome<T> {
    Computed(T),
    NoData { period_days: u32 },
}

impl<T> KpiOutcome<T> {
    pub fn computed(&self) -> Option<&T> {
        match self {
            Self::Computed(v) => Some(v),
            Self::NoData { .. } => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enpi {
    pub enpi: f64,
    pub baseline_enpi: f64,
    pub deviation_percent: f64,
    pub avg_power_kwh: f64,
    pub avg_load_percent: f64,
    pub record_count: usize,
    pub period_days: u32,
}

/// Where the excess-consumption baseline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcessBaseline {
    /// `mean(power_kwh) * count` over the measured window itself.
    #[default]
    WindowMean,
    /// Sum of stored `predicted_kwh` covering the window.
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcessConsumption {
    pub total_consumption_kwh: f64,
    pub baseline_kwh: f64,
    pub excess_kwh: f64,
    pub excess_percent: f64,
    pub anomalies_excess_kwh: f64,
    pub baseline_source: ExcessBaseline,
    pub period_days: u32,
    /// `excess_kwh` before rounding, fed into the economic effect.
    #[serde(skip)]
    unrounded_excess_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Efficiency {
    pub avg_efficiency: f64,
    pub min_efficiency: f64,
    pub max_efficiency: f64,
    pub sample_count: usize,
    pub period_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicEffect {
    pub savings_kwh: f64,
    pub savings_rub: f64,
    pub annual_savings_kwh: f64,
    pub annual_savings_rub: f64,
    pub optimization_percent: f64,
    pub period_days: u32,
    pub energy_price_per_kwh: f64,
}

/// All KPIs for one window. Computed per request and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub enpi: KpiOutcome<Enpi>,
    pub excess_consumption: KpiOutcome<ExcessConsumption>,
    pub efficiency: KpiOutcome<Efficiency>,
    pub economic_effect: EconomicEffect,
    pub period_days: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

/// Inputs already restricted to the KPI window.
#[derive(Debug, Clone, Copy)]
pub struct KpiWindow<'a> {
    pub readings: &'a [NormalizedReading],
    pub anomalies: &'a [AnomalyRecord],
    /// Stored forecasts inside the window; only consulted for
    /// [`ExcessBaseline::Forecast`].
    pub forecast: &'a [ForecastPoint],
    pub period_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiConfig {
    pub energy_price_per_kwh: f64,
    pub excess_baseline: ExcessBaseline,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            energy_price_per_kwh: DEFAULT_ENERGY_PRICE_PER_KWH,
            excess_baseline: ExcessBaseline::WindowMean,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KpiEngine {
    config: KpiConfig,
}

impl KpiEngine {
    pub fn new(config: KpiConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KpiConfig {
        &self.config
    }

    /// Energy performance indicator: mean power per percent of load.
    pub fn enpi(&self, window: &[NormalizedReading], period_days: u32) -> KpiOutcome<Enpi> {
        let (Some(avg_power), Some(avg_load)) = (
            mean(window.iter().map(|r| r.power_kwh)),
            mean(window.iter().map(|r| r.load_percent)),
        ) else {
            return KpiOutcome::NoData { period_days };
        };

        let enpi = if avg_load > 0.0 { avg_power / avg_load } else { 0.0 };
        let baseline_enpi = enpi * BASELINE_ENPI_FACTOR;
        let deviation_percent = if baseline_enpi > 0.0 {
            (enpi - baseline_enpi) / baseline_enpi * 100.0
        } else {
            0.0
        };

        KpiOutcome::Computed(Enpi {
            enpi: round4(enpi),
            baseline_enpi: round4(baseline_enpi),
            deviation_percent: round2(deviation_percent),
            avg_power_kwh: round2(avg_power),
            avg_load_percent: round2(avg_load),
            record_count: window.len(),
            period_days,
        })
    }

    /// Consumption above the window's own mean-based baseline.
    ///
    /// `baseline = mean * count` equals the window total, so `excess_kwh` is
    /// zero up to float error. Use [`Self::excess_consumption_against_forecast`]
    /// for a baseline that is independent of the measured window.
    pub fn excess_consumption(
        &self,
        window: &[NormalizedReading],
        anomalies: &[AnomalyRecord],
        period_days: u32,
    ) -> KpiOutcome<ExcessConsumption> {
        let Some(avg_actual) = mean(window.iter().map(|r| r.power_kwh)) else {
            return KpiOutcome::NoData { period_days };
        };
        let baseline_kwh = avg_actual * window.len() as f64;
        Self::excess_against(window, anomalies, baseline_kwh, ExcessBaseline::WindowMean, period_days)
    }

    /// Like [`Self::excess_consumption`] but measured against stored forecasts.
    ///
    /// Falls back to the window-mean baseline when the forecasts sum to zero
    /// or less.
    pub fn excess_consumption_against_forecast(
        &self,
        window: &[NormalizedReading],
        anomalies: &[AnomalyRecord],
        forecast: &[ForecastPoint],
        period_days: u32,
    ) -> KpiOutcome<ExcessConsumption> {
        if window.is_empty() {
            return KpiOutcome::NoData { period_days };
        }

        let total_predicted: f64 = forecast.iter().map(|p| p.predicted_kwh).sum();
        if total_predicted > 0.0 {
            Self::excess_against(window, anomalies, total_predicted, ExcessBaseline::Forecast, period_days)
        } else {
            self.excess_consumption(window, anomalies, period_days)
        }
    }

    fn excess_against(
        window: &[NormalizedReading],
        anomalies: &[AnomalyRecord],
        baseline_kwh: f64,
        baseline_source: ExcessBaseline,
        period_days: u32,
    ) -> KpiOutcome<ExcessConsumption> {
        let total_actual: f64 = window.iter().map(|r| r.power_kwh).sum();
        let excess_kwh = total_actual - baseline_kwh;
        let excess_percent = if baseline_kwh > 0.0 {
            excess_kwh / baseline_kwh * 100.0
        } else {
            0.0
        };
        let anomalies_excess_kwh: f64 = anomalies.iter().map(|a| a.excess_kwh).sum();

        KpiOutcome::Computed(ExcessConsumption {
            total_consumption_kwh: round2(total_actual),
            baseline_kwh: round2(baseline_kwh),
            excess_kwh: round2(excess_kwh),
            excess_percent: round2(excess_percent),
            anomalies_excess_kwh: round2(anomalies_excess_kwh),
            baseline_source,
            period_days,
            unrounded_excess_kwh: excess_kwh,
        })
    }

    /// Efficiency statistics over readings with strictly positive efficiency.
    pub fn efficiency(&self, window: &[NormalizedReading], period_days: u32) -> KpiOutcome<Efficiency> {
        let values: Vec<f64> = window
            .iter()
            .map(|r| r.efficiency)
            .filter(|e| *e > 0.0)
            .collect();

        let Some(avg) = mean(values.iter().copied()) else {
            return KpiOutcome::NoData { period_days };
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        KpiOutcome::Computed(Efficiency {
            avg_efficiency: round2(avg),
            min_efficiency: round2(min),
            max_efficiency: round2(max),
            sample_count: values.len(),
            period_days,
        })
    }

    /// Savings from trimming `optimization_percent` of the excess.
    ///
    /// No data or non-positive excess yields zero savings, never negative.
    pub fn economic_effect(
        &self,
        excess: &KpiOutcome<ExcessConsumption>,
        optimization_percent: f64,
        period_days: u32,
    ) -> EconomicEffect {
        let price = self.config.energy_price_per_kwh;
        let excess_kwh = excess
            .computed()
            .map(|e| e.unrounded_excess_kwh)
            .filter(|kwh| *kwh > 0.0)
            .unwrap_or(0.0);

        let savings_kwh = excess_kwh * optimization_percent / 100.0;
        let annual_savings_kwh = if period_days > 0 {
            savings_kwh * DAYS_PER_YEAR / f64::from(period_days)
        } else {
            0.0
        };

        EconomicEffect {
            savings_kwh: round2(savings_kwh),
            savings_rub: round2(savings_kwh * price),
            annual_savings_kwh: round2(annual_savings_kwh),
            annual_savings_rub: round2(annual_savings_kwh * price),
            optimization_percent,
            period_days,
            energy_price_per_kwh: price,
        }
    }

    /// Excess consumption using the configured baseline source.
    pub fn configured_excess(&self, window: &KpiWindow<'_>) -> KpiOutcome<ExcessConsumption> {
        match self.config.excess_baseline {
            ExcessBaseline::WindowMean => {
                self.excess_consumption(window.readings, window.anomalies, window.period_days)
            }
            ExcessBaseline::Forecast => self.excess_consumption_against_forecast(
                window.readings,
                window.anomalies,
                window.forecast,
                window.period_days,
            ),
        }
    }

    pub fn snapshot(
        &self,
        window: &KpiWindow<'_>,
        optimization_percent: f64,
        computed_at: OffsetDateTime,
    ) -> KpiSnapshot {
        let excess_consumption = self.configured_excess(window);
        let economic_effect =
            self.economic_effect(&excess_consumption, optimization_percent, window.period_days);

        KpiSnapshot {
            enpi: self.enpi(window.readings, window.period_days),
            excess_consumption,
            efficiency: self.efficiency(window.readings, window.period_days),
            economic_effect,
            period_days: window.period_days,
            computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::domain::AnomalyCause;
    use time::macros::datetime;

    fn reading(power_kwh: f64, load_percent: f64) -> NormalizedReading {
        NormalizedReading {
            timestamp: datetime!(2025-01-10 00:00:00 UTC),
            installation_id: "INST_001".to_string(),
            power_kwh,
            load_percent,
            temperature: None,
            pressure: None,
            efficiency: load_percent / power_kwh * 100.0,
            specific_consumption: power_kwh / load_percent,
            is_outlier: false,
        }
    }

    fn anomaly(excess_kwh: f64) -> AnomalyRecord {
        AnomalyRecord {
            timestamp: datetime!(2025-01-10 00:00:00 UTC),
            power_kwh: 100.0 + excess_kwh,
            excess_kwh,
            cause: AnomalyCause::HighConsumption,
            description: String::new(),
        }
    }

    fn forecast(predicted_kwh: f64) -> ForecastPoint {
        ForecastPoint {
            timestamp: datetime!(2025-01-10 00:00:00 UTC),
            predicted_kwh,
            confidence_lower: predicted_kwh * 0.9,
            confidence_upper: predicted_kwh * 1.1,
        }
    }

    #[test]
    fn enpi_reference_example() {
        let window = vec![reading(100.0, 50.0), reading(120.0, 60.0)];
        let outcome = KpiEngine::default().enpi(&window, 30);
        let enpi = outcome.computed().unwrap();

        assert_eq!(enpi.enpi, 2.0);
        assert_eq!(enpi.baseline_enpi, 2.1);
        assert_eq!(enpi.deviation_percent, -4.76);
        assert_eq!(enpi.avg_power_kwh, 110.0);
        assert_eq!(enpi.avg_load_percent, 55.0);
        assert_eq!(enpi.record_count, 2);
        assert_eq!(enpi.period_days, 30);
    }

    #[test]
    fn excess_consumption_self_cancels_under_window_mean() {
        let window = vec![reading(100.0, 50.0), reading(120.0, 60.0), reading(95.5, 40.0)];
        let anomalies = vec![anomaly(12.5), anomaly(7.25)];
        let outcome = KpiEngine::default().excess_consumption(&window, &anomalies, 30);
        let excess = outcome.computed().unwrap();

        assert_eq!(excess.total_consumption_kwh, 315.5);
        assert_eq!(excess.baseline_kwh, 315.5);
        assert_eq!(excess.excess_kwh, 0.0);
        assert_eq!(excess.excess_percent, 0.0);
        assert_eq!(excess.anomalies_excess_kwh, 19.75);
        assert_eq!(excess.baseline_source, ExcessBaseline::WindowMean);
    }

    #[test]
    fn excess_against_forecast_uses_predicted_total() {
        let window = vec![reading(100.0, 50.0), reading(120.0, 60.0)];
        let outcome = KpiEngine::default().excess_consumption_against_forecast(
            &window,
            &[],
            &[forecast(100.0), forecast(100.0)],
            30,
        );
        let excess = outcome.computed().unwrap();

        assert_eq!(excess.baseline_kwh, 200.0);
        assert_eq!(excess.excess_kwh, 20.0);
        assert_eq!(excess.excess_percent, 10.0);
        assert_eq!(excess.baseline_source, ExcessBaseline::Forecast);
    }

    #[test]
    fn excess_against_empty_forecast_falls_back_to_window_mean() {
        let window = vec![reading(100.0, 50.0)];
        let outcome = KpiEngine::default().excess_consumption_against_forecast(&window, &[], &[], 30);
        assert_eq!(outcome.computed().unwrap().baseline_source, ExcessBaseline::WindowMean);
    }

    #[test]
    fn efficiency_ignores_non_positive_values() {
        let mut window = vec![reading(100.0, 50.0), reading(200.0, 50.0)];
        let mut zero = reading(100.0, 50.0);
        zero.efficiency = 0.0;
        window.push(zero);

        let outcome = KpiEngine::default().efficiency(&window, 7);
        let eff = outcome.computed().unwrap();
        assert_eq!(eff.avg_efficiency, 37.5);
        assert_eq!(eff.min_efficiency, 25.0);
        assert_eq!(eff.max_efficiency, 50.0);
        assert_eq!(eff.sample_count, 2);
        assert_eq!(eff.period_days, 7);
    }

    #[test]
    fn efficiency_with_no_positive_values_is_no_data() {
        let mut r = reading(100.0, 50.0);
        r.efficiency = 0.0;
        assert!(KpiEngine::default().efficiency(&[r], 30).is_no_data());
    }

    #[test]
    fn economic_effect_scales_excess_to_savings() {
        let engine = KpiEngine::new(KpiConfig {
            energy_price_per_kwh: 5.0,
            ..KpiConfig::default()
        });
        let excess = KpiOutcome::Computed(ExcessConsumption {
            total_consumption_kwh: 1200.0,
            baseline_kwh: 1000.0,
            excess_kwh: 200.0,
            excess_percent: 20.0,
            anomalies_excess_kwh: 0.0,
            baseline_source: ExcessBaseline::Forecast,
            period_days: 30,
            unrounded_excess_kwh: 200.0,
        });

        let effect = engine.economic_effect(&excess, 2.5, 30);
        assert_eq!(effect.savings_kwh, 5.0);
        assert_eq!(effect.savings_rub, 25.0);
        assert_eq!(effect.annual_savings_kwh, 60.83);
        assert_eq!(effect.annual_savings_rub, 304.17);
        assert_eq!(effect.energy_price_per_kwh, 5.0);
    }

    #[test]
    fn economic_effect_is_zero_without_positive_excess() {
        let engine = KpiEngine::default();
        let window = vec![reading(100.0, 50.0), reading(120.0, 60.0)];
        let excess = engine.excess_consumption(&window, &[], 30);
        let effect = engine.economic_effect(&excess, 5.0, 30);
        assert_eq!(effect.savings_kwh, 0.0);
        assert_eq!(effect.savings_rub, 0.0);
        assert_eq!(effect.annual_savings_rub, 0.0);

        let none = engine.economic_effect(&KpiOutcome::NoData { period_days: 30 }, 5.0, 30);
        assert_eq!(none.savings_kwh, 0.0);
    }

    #[test]
    fn empty_window_yields_no_data_everywhere() {
        let engine = KpiEngine::default();
        let window = KpiWindow {
            readings: &[],
            anomalies: &[],
            forecast: &[],
            period_days: 30,
        };
        let snapshot = engine.snapshot(&window, 1.0, datetime!(2025-01-10 00:00:00 UTC));

        assert!(snapshot.enpi.is_no_data());
        assert!(snapshot.excess_consumption.is_no_data());
        assert!(snapshot.efficiency.is_no_data());
        assert_eq!(snapshot.economic_effect.savings_kwh, 0.0);
        assert_eq!(snapshot.economic_effect.annual_savings_kwh, 0.0);
    }

    #[test]
    fn snapshot_honours_configured_baseline() {
        let engine = KpiEngine::new(KpiConfig {
            excess_baseline: ExcessBaseline::Forecast,
            ..KpiConfig::default()
        });
        let readings = vec![reading(100.0, 50.0), reading(120.0, 60.0)];
        let forecast = vec![forecast(200.0)];
        let window = KpiWindow {
            readings: &readings,
            anomalies: &[],
            forecast: &forecast,
            period_days: 30,
        };

        let snapshot = engine.snapshot(&window, 10.0, datetime!(2025-01-10 00:00:00 UTC));
        assert_eq!(snapshot.excess_consumption.computed().unwrap().excess_kwh, 20.0);
        assert_eq!(snapshot.economic_effect.savings_kwh, 2.0);
        assert_eq!(snapshot.economic_effect.savings_rub, 10.0);
    }

    #[test]
    fn economic_effect_uses_unrounded_excess() {
        let engine = KpiEngine::default();
        let window = vec![reading(101.004, 50.0)];
        let excess = engine.excess_consumption_against_forecast(&window, &[], &[forecast(100.0)], 30);
        assert_eq!(excess.computed().unwrap().excess_kwh, 1.0);

        let effect = engine.economic_effect(&excess, 100.0, 30);
        // 1.004 * 365 / 30, not 1.0 * 365 / 30
        assert_eq!(effect.annual_savings_kwh, 12.22);
        assert_eq!(effect.savings_kwh, 1.0);
    }

    #[test]
    fn window_start_rejects_out_of_range_periods() {
        let now = datetime!(2025-01-31 12:00:00 UTC);
        assert_eq!(window_start(now, 30).unwrap(), datetime!(2025-01-01 12:00:00 UTC));
        assert!(matches!(window_start(now, u32::MAX), Err(PipelineError::InvalidArgument(_))));
    }

    #[test]
    fn no_data_serializes_with_status_tag() {
        let outcome: KpiOutcome<Enpi> = KpiOutcome::NoData { period_days: 30 };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"status": "no_data", "period_days": 30}));
    }

    #[test]
    fn rounding_drops_negative_zero() {
        assert!(round2(-1e-12).is_sign_positive());
        assert_eq!(round4(2.099_999_99), 2.1);
    }
}
