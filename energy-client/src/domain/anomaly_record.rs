use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCause {
    HighConsumption,
    LowConsumption,
}

impl AnomalyCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighConsumption => "high_consumption",
            Self::LowConsumption => "low_consumption",
        }
    }
}

impl fmt::Display for AnomalyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown anomaly cause '{0}'")]
pub struct UnknownCause(pub String);

impl FromStr for AnomalyCause {
    type Err = UnknownCause;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_consumption" => Ok(Self::HighConsumption),
            "low_consumption" => Ok(Self::LowConsumption),
            other => Err(UnknownCause(other.to_string())),
        }
    }
}

/// A reading whose power draw deviated from the window mean by more than the
/// detector threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub power_kwh: f64,
    /// Consumption above the window mean; zero for low-consumption anomalies.
    pub excess_kwh: f64,
    pub cause: AnomalyCause,
    pub description: String,
}
