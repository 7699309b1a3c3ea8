use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A validated reading with derived efficiency metrics.
///
/// Rows only exist for readings with strictly positive `power_kwh` and
/// `load_percent`, so both ratios are always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NormalizedReading {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub installation_id: String,
    pub power_kwh: f64,
    pub load_percent: f64,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    /// `load_percent / power_kwh * 100`
    pub efficiency: f64,
    /// `power_kwh / load_percent`
    pub specific_consumption: f64,
    pub is_outlier: bool,
}
