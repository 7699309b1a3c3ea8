use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Installation assumed when a telemetry record does not name one.
pub const DEFAULT_INSTALLATION_ID: &str = "INST_001";

/// A single telemetry sample as delivered by SCADA/ERP exports.
///
/// Raw readings are archived verbatim and never mutated; derived metrics live
/// on [`super::NormalizedReading`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawReading {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub installation_id: String,
    pub power_kwh: f64,
    pub load_percent: f64,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
}
