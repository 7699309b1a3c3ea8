//! Statistical outlier detection over a window of normalized readings.
//!
//! A reading is anomalous when its `power_kwh` lies more than
//! `threshold_std` population standard deviations from the window mean.

use energy_client::domain::{AnomalyCause, AnomalyRecord, NormalizedReading};

pub const DEFAULT_THRESHOLD_STD: f64 = 2.0;

/// Population mean and standard deviation of `power_kwh`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl WindowStats {
    /// `None` for an empty window, or when variance is degenerate: fewer than
    /// two distinct values, or a standard deviation of zero.
    pub fn compute(window: &[NormalizedReading]) -> Option<Self> {
        let first = window.first()?.power_kwh;
        if window.iter().all(|r| r.power_kwh == first) {
            return None;
        }

        let n = window.len() as f64;
        let mean = window.iter().map(|r| r.power_kwh).sum::<f64>() / n;
        let variance = window
            .iter()
            .map(|r| {
                let d = r.power_kwh - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();

        (std_dev > 0.0 && std_dev.is_finite()).then_some(Self { mean, std_dev })
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    threshold_std: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_STD)
    }
}

impl AnomalyDetector {
    pub fn new(threshold_std: f64) -> Self {
        Self { threshold_std }
    }

    pub fn threshold_std(&self) -> f64 {
        self.threshold_std
    }

    fn is_anomalous(&self, stats: &WindowStats, power_kwh: f64) -> bool {
        (power_kwh - stats.mean).abs() > self.threshold_std * stats.std_dev
    }

    /// Flag readings deviating from the window mean by more than the threshold.
    ///
    /// Output follows window order. `excess_kwh` is clamped at zero, so
    /// low-consumption anomalies always report no excess.
    pub fn detect(&self, window: &[NormalizedReading]) -> Vec<AnomalyRecord> {
        let Some(stats) = WindowStats::compute(window) else {
            if !window.is_empty() {
                tracing::debug!(readings = window.len(), "degenerate variance, skipping anomaly detection");
            }
            return Vec::new();
        };

        let anomalies: Vec<_> = window
            .iter()
            .filter(|r| self.is_anomalous(&stats, r.power_kwh))
            .map(|r| self.record_for(&stats, r))
            .collect();

        tracing::info!(
            readings = window.len(),
            anomalies = anomalies.len(),
            mean_kwh = stats.mean,
            std_kwh = stats.std_dev,
            "anomaly detection finished"
        );
        metrics::counter!("anomalies_detected_total").increment(anomalies.len() as u64);

        anomalies
    }

    /// Copies of `window` with `is_outlier` set by the same rule as [`Self::detect`].
    pub fn flag_outliers(&self, window: &[NormalizedReading]) -> Vec<NormalizedReading> {
        let stats = WindowStats::compute(window);
        window
            .iter()
            .map(|r| NormalizedReading {
                is_outlier: stats.is_some_and(|s| self.is_anomalous(&s, r.power_kwh)),
                ..r.clone()
            })
            .collect()
    }

    fn record_for(&self, stats: &WindowStats, r: &NormalizedReading) -> AnomalyRecord {
        let deviation = r.power_kwh - stats.mean;
        let cause = if r.power_kwh > stats.mean {
            AnomalyCause::HighConsumption
        } else {
            AnomalyCause::LowConsumption
        };
        let direction = match cause {
            AnomalyCause::HighConsumption => "above",
            AnomalyCause::LowConsumption => "below",
        };

        AnomalyRecord {
            timestamp: r.timestamp,
            power_kwh: r.power_kwh,
            excess_kwh: deviation.max(0.0),
            cause,
            description: format!(
                "{}: {:.2} kWh is {:.2} kWh ({:.1} sigma) {direction} the window mean of {:.2} kWh",
                r.installation_id,
                r.power_kwh,
                deviation.abs(),
                deviation.abs() / stats.std_dev,
                stats.mean,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    fn window(powers: &[f64]) -> Vec<NormalizedReading> {
        let start = datetime!(2025-01-01 00:00:00 UTC);
        powers
            .iter()
            .enumerate()
            .map(|(i, &p)| NormalizedReading {
                timestamp: start + Duration::hours(i as i64),
                installation_id: "INST_001".to_string(),
                power_kwh: p,
                load_percent: 50.0,
                temperature: None,
                pressure: None,
                efficiency: 50.0 / p * 100.0,
                specific_consumption: p / 50.0,
                is_outlier: false,
            })
            .collect()
    }

    #[test]
    fn flags_single_spike_as_high_consumption() {
        let w = window(&[10.0, 10.0, 10.0, 10.0, 100.0]);
        let stats = WindowStats::compute(&w).unwrap();
        assert!((stats.mean - 28.0).abs() < 1e-9);
        assert!((stats.std_dev - 36.0).abs() < 1e-9);

        let anomalies = AnomalyDetector::default().detect(&w);
        assert_eq!(anomalies.len(), 1);
        let a = &anomalies[0];
        assert_eq!(a.power_kwh, 100.0);
        assert_eq!(a.cause, AnomalyCause::HighConsumption);
        assert!((a.excess_kwh - 72.0).abs() < 1e-9);
        assert_eq!(a.timestamp, w[4].timestamp);
    }

    #[test]
    fn low_consumption_anomaly_has_zero_excess() {
        let w = window(&[100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 1.0]);
        let anomalies = AnomalyDetector::default().detect(&w);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].cause, AnomalyCause::LowConsumption);
        assert_eq!(anomalies[0].excess_kwh, 0.0);
        assert!(anomalies[0].description.contains("below"));
    }

    #[test]
    fn constant_window_yields_nothing() {
        let w = window(&[42.0, 42.0, 42.0]);
        assert!(WindowStats::compute(&w).is_none());
        assert!(AnomalyDetector::default().detect(&w).is_empty());
    }

    #[test]
    fn empty_and_single_reading_windows_yield_nothing() {
        assert!(AnomalyDetector::default().detect(&[]).is_empty());
        assert!(AnomalyDetector::default().detect(&window(&[5.0])).is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let w = window(&[10.0, 12.0, 11.0, 9.0, 10.5, 60.0, 10.0, 11.5]);
        let detector = AnomalyDetector::default();
        assert_eq!(detector.detect(&w), detector.detect(&w));
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        // mean 0, population std 1: both points sit exactly at 1 sigma.
        let w = window(&[-1.0, 1.0]);
        assert!(AnomalyDetector::new(1.0).detect(&w).is_empty());
        assert_eq!(AnomalyDetector::new(0.5).detect(&w).len(), 2);
    }

    #[test]
    fn flag_outliers_marks_only_anomalous_rows() {
        let w = window(&[10.0, 10.0, 10.0, 10.0, 100.0]);
        let flagged = AnomalyDetector::default().flag_outliers(&w);
        assert_eq!(
            flagged.iter().map(|r| r.is_outlier).collect::<Vec<_>>(),
            vec![false, false, false, false, true]
        );
        assert!(w.iter().all(|r| !r.is_outlier));
    }
}
