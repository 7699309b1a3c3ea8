use std::sync::Arc;

use energy_client::domain::{AnomalyRecord, ForecastPoint, NormalizedReading, RawReading};
use futures::StreamExt;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use super::{Envelope, PipelineError, Source};
use crate::{
    anomaly::AnomalyDetector,
    config::AnalyticsConfig,
    forecast::{self, BaselineForecaster, ForecastAccuracy, ForecastStrategy},
    kpi::{self, EconomicEffect, Efficiency, Enpi, ExcessConsumption, KpiEngine, KpiOutcome, KpiSnapshot, KpiWindow},
    sinks::AnalyticsStore,
    transform::Normalizer,
};

pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub status: RunStatus,
    pub forecast_periods: u32,
    pub anomalies_count: usize,
    pub forecast: Vec<ForecastPoint>,
    /// Accuracy of earlier forecasts that now have actuals to compare with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ForecastAccuracy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalysisResult {
    fn error(forecast_periods: u32, message: String) -> Self {
        Self {
            status: RunStatus::Error,
            forecast_periods,
            anomalies_count: 0,
            forecast: Vec::new(),
            metrics: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub status: RunStatus,
    pub raw_records: usize,
    pub malformed_records: usize,
    pub clean_records: usize,
    pub persisted_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestReport {
    fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = RunStatus::Error;
        self.message = Some(message.into());
        self
    }
}

/// Entry point for external callers: ETL ingestion, analysis runs and KPI
/// queries over one store.
///
/// Failures inside `ingest` and `run_analysis` are reported through the
/// result's `status`/`message`; they never surface as `Err`.
pub struct Orchestrator {
    store: Arc<dyn AnalyticsStore>,
    normalizer: Normalizer<dyn AnalyticsStore>,
    detector: AnomalyDetector,
    forecaster: Box<dyn ForecastStrategy>,
    kpi: KpiEngine,
    config: AnalyticsConfig,
    run_lock: tokio::sync::Mutex<()>,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn AnalyticsStore>, config: AnalyticsConfig) -> Self {
        let forecaster = match config.forecast_seed {
            Some(seed) => BaselineForecaster::seeded(seed),
            None => BaselineForecaster::from_entropy(),
        }
        .with_spread(config.forecast_jitter, config.forecast_band);

        Self {
            normalizer: Normalizer::new(store.clone()),
            store,
            detector: AnomalyDetector::new(config.anomaly_threshold_std),
            forecaster: Box::new(forecaster),
            kpi: KpiEngine::new(config.kpi()),
            config,
            run_lock: tokio::sync::Mutex::new(()),
            clock: Arc::new(OffsetDateTime::now_utc),
        }
    }

    pub fn with_forecaster(mut self, forecaster: Box<dyn ForecastStrategy>) -> Self {
        self.forecaster = forecaster;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    /// Pull a batch from `source`, archive it and store the normalized subset.
    ///
    /// Malformed records are skipped and counted. A source-level failure or a
    /// failed write stops the batch; rows written before that stay committed.
    pub async fn ingest<S>(&self, source: &S) -> IngestReport
    where
        S: Source<RawReading> + ?Sized,
    {
        let mut report = IngestReport {
            status: RunStatus::Success,
            raw_records: 0,
            malformed_records: 0,
            clean_records: 0,
            persisted_count: 0,
            message: None,
        };

        let mut batch: Vec<Envelope<RawReading>> = Vec::new();
        let mut stream = source.stream().await;
        while let Some(item) = stream.next().await {
            match item {
                Ok(env) => batch.push(env),
                Err(e) if e.is_record_level() => {
                    report.malformed_records += 1;
                    tracing::warn!(error = %e, "skipping malformed raw record");
                }
                Err(e) => {
                    tracing::error!(error = %e, "raw reading source failed");
                    return report.failed(e.to_string());
                }
            }
        }
        report.raw_records = batch.len();

        if batch.is_empty() {
            return report.failed("no raw readings could be loaded");
        }

        match self.normalizer.normalize(&batch).await {
            Ok(outcome) => {
                report.clean_records = outcome.normalized.len();
                report.persisted_count = outcome.persisted_count;
                if outcome.normalized.is_empty() {
                    return report.failed("no readings passed normalization");
                }
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "normalization failed");
                report.failed(e.to_string())
            }
        }
    }

    /// Forecast and detect anomalies over the trailing window, persisting
    /// both. `horizon` defaults to the configured value.
    pub async fn run_analysis(&self, horizon: Option<u32>) -> AnalysisResult {
        let horizon = horizon.unwrap_or(self.config.horizon);
        let _guard = self.run_lock.lock().await;
        metrics::counter!("analysis_runs_total").increment(1);

        match self.try_run_analysis(horizon).await {
            Ok(result) => {
                tracing::info!(
                    horizon,
                    anomalies = result.anomalies_count,
                    strategy = self.forecaster.name(),
                    "analysis finished"
                );
                result
            }
            Err(e) => {
                metrics::counter!("analysis_failures_total").increment(1);
                tracing::error!(error = %e, horizon, "analysis failed");
                AnalysisResult::error(horizon, e.to_string())
            }
        }
    }

    async fn try_run_analysis(&self, horizon: u32) -> Result<AnalysisResult, PipelineError> {
        let now = self.now();
        let since = kpi::window_start(now, self.config.window_days)?;
        let window = self.store.normalized_since(since).await?;
        if window.is_empty() {
            return Err(PipelineError::InsufficientData(format!(
                "no normalized readings in the last {} days",
                self.config.window_days
            )));
        }

        let past_forecast = self.past_forecast(since, now).await?;
        let metrics = forecast::accuracy(&past_forecast, &window);

        let points = self.forecaster.forecast(&window, horizon, utc_date(now))?;
        self.store.insert_forecast(&points).await?;

        let anomalies = self.detector.detect(&window);
        if !anomalies.is_empty() {
            self.store.insert_anomalies(&anomalies).await?;
        }

        Ok(AnalysisResult {
            status: RunStatus::Success,
            forecast_periods: horizon,
            anomalies_count: anomalies.len(),
            forecast: points,
            metrics,
            message: None,
        })
    }

    async fn past_forecast(&self, since: OffsetDateTime, now: OffsetDateTime) -> Result<Vec<ForecastPoint>, PipelineError> {
        let mut points = self.store.forecast_since(since).await?;
        points.retain(|p| p.timestamp <= now);
        Ok(points)
    }

    /// Forecast without persisting anything.
    pub async fn preview_forecast(&self, horizon: Option<u32>) -> Result<Vec<ForecastPoint>, PipelineError> {
        let horizon = horizon.unwrap_or(self.config.horizon);
        let now = self.now();
        let window = self
            .store
            .normalized_since(kpi::window_start(now, self.config.window_days)?)
            .await?;
        self.forecaster.forecast(&window, horizon, utc_date(now))
    }

    /// Anomalies in the trailing window, computed on the fly and not stored.
    pub async fn detect_anomalies(&self, period_days: Option<u32>) -> Result<Vec<AnomalyRecord>, PipelineError> {
        let window = self.readings(self.period(period_days)).await?;
        Ok(self.detector.detect(&window))
    }

    /// The trailing window with `is_outlier` flags applied.
    pub async fn recent_readings(&self, period_days: Option<u32>) -> Result<Vec<NormalizedReading>, PipelineError> {
        let window = self.readings(self.period(period_days)).await?;
        Ok(self.detector.flag_outliers(&window))
    }

    pub async fn enpi(&self, period_days: Option<u32>) -> Result<KpiOutcome<Enpi>, PipelineError> {
        let period_days = self.period(period_days);
        let window = self.readings(period_days).await?;
        Ok(self.kpi.enpi(&window, period_days))
    }

    pub async fn excess_consumption(
        &self,
        period_days: Option<u32>,
    ) -> Result<KpiOutcome<ExcessConsumption>, PipelineError> {
        let inputs = self.kpi_inputs(self.period(period_days)).await?;
        Ok(self.kpi.configured_excess(&inputs.window()))
    }

    pub async fn efficiency(&self, period_days: Option<u32>) -> Result<KpiOutcome<Efficiency>, PipelineError> {
        let period_days = self.period(period_days);
        let window = self.readings(period_days).await?;
        Ok(self.kpi.efficiency(&window, period_days))
    }

    pub async fn economic_effect(
        &self,
        optimization_percent: Option<f64>,
        period_days: Option<u32>,
    ) -> Result<EconomicEffect, PipelineError> {
        let period_days = self.period(period_days);
        let optimization_percent = optimization_percent.unwrap_or(self.config.optimization_percent);
        let excess = self.excess_consumption(Some(period_days)).await?;
        Ok(self.kpi.economic_effect(&excess, optimization_percent, period_days))
    }

    /// All KPIs for one window.
    pub async fn kpi_snapshot(
        &self,
        period_days: Option<u32>,
        optimization_percent: Option<f64>,
    ) -> Result<KpiSnapshot, PipelineError> {
        let inputs = self.kpi_inputs(self.period(period_days)).await?;
        let optimization_percent = optimization_percent.unwrap_or(self.config.optimization_percent);
        Ok(self.kpi.snapshot(&inputs.window(), optimization_percent, self.now()))
    }

    fn period(&self, period_days: Option<u32>) -> u32 {
        period_days.unwrap_or(self.config.period_days)
    }

    async fn readings(&self, period_days: u32) -> Result<Vec<NormalizedReading>, PipelineError> {
        self.store
            .normalized_since(kpi::window_start(self.now(), period_days)?)
            .await
    }

    async fn kpi_inputs(&self, period_days: u32) -> Result<KpiInputs, PipelineError> {
        let now = self.now();
        let since = kpi::window_start(now, period_days)?;
        Ok(KpiInputs {
            readings: self.store.normalized_since(since).await?,
            anomalies: self.store.anomalies_since(since).await?,
            forecast: self.past_forecast(since, now).await?,
            period_days,
        })
    }
}

struct KpiInputs {
    readings: Vec<NormalizedReading>,
    anomalies: Vec<AnomalyRecord>,
    forecast: Vec<ForecastPoint>,
    period_days: u32,
}

impl KpiInputs {
    fn window(&self) -> KpiWindow<'_> {
        KpiWindow {
            readings: &self.readings,
            anomalies: &self.anomalies,
            forecast: &self.forecast,
            period_days: self.period_days,
        }
    }
}

fn utc_date(ts: OffsetDateTime) -> time::Date {
    ts.to_offset(UtcOffset::UTC).date()
}
