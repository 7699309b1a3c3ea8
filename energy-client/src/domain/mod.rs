mod anomaly_record;
mod forecast_point;
mod normalized_reading;
mod raw_reading;

pub use anomaly_record::{AnomalyCause, AnomalyRecord, UnknownCause};
pub use forecast_point::ForecastPoint;
pub use normalized_reading::NormalizedReading;
pub use raw_reading::{RawReading, DEFAULT_INSTALLATION_ID};
