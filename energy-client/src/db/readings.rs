use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{AnomalyRecord, ForecastPoint, NormalizedReading};

/// Row shape of the `anomalies` table; `cause` is stored as text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnomalyRow {
    pub timestamp: OffsetDateTime,
    pub power_kwh: f64,
    pub excess_kwh: f64,
    pub cause: String,
    pub description: String,
}

impl TryFrom<AnomalyRow> for AnomalyRecord {
    type Error = anyhow::Error;

    fn try_from(row: AnomalyRow) -> Result<Self> {
        Ok(AnomalyRecord {
            timestamp: row.timestamp,
            power_kwh: row.power_kwh,
            excess_kwh: row.excess_kwh,
            cause: row.cause.parse()?,
            description: row.description,
        })
    }
}

/// Fetch the time-ordered normalized window starting at `since`.
pub async fn normalized_since(pool: &PgPool, since: OffsetDateTime) -> Result<Vec<NormalizedReading>> {
    let rows = sqlx::query_as::<_, NormalizedReading>(
        r#"
        SELECT
            timestamp,
            installation_id,
            power_kwh,
            load_percent,
            temperature,
            pressure,
            efficiency,
            specific_consumption,
            is_outlier
        FROM clean_data
        WHERE timestamp >= $1
        ORDER BY timestamp
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Fetch stored anomalies starting at `since`.
///
/// Rows with a cause label this client does not know are an error rather than
/// being silently dropped.
pub async fn anomalies_since(pool: &PgPool, since: OffsetDateTime) -> Result<Vec<AnomalyRecord>> {
    let rows = sqlx::query_as::<_, AnomalyRow>(
        r#"
        SELECT
            timestamp,
            power_kwh,
            excess_kwh,
            cause,
            description
        FROM anomalies
        WHERE timestamp >= $1
        ORDER BY timestamp
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AnomalyRecord::try_from).collect()
}

/// Fetch stored forecast points whose target day is at or after `since`.
pub async fn forecast_since(pool: &PgPool, since: OffsetDateTime) -> Result<Vec<ForecastPoint>> {
    let rows = sqlx::query_as::<_, ForecastPoint>(
        r#"
        SELECT
            timestamp,
            predicted_kwh,
            confidence_lower,
            confidence_upper
        FROM forecast
        WHERE timestamp >= $1
        ORDER BY timestamp
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnomalyCause;
    use time::macros::datetime;

    #[test]
    fn anomaly_row_converts_known_cause() {
        let row = AnomalyRow {
            timestamp: datetime!(2025-01-03 10:00:00 UTC),
            power_kwh: 100.0,
            excess_kwh: 72.0,
            cause: "high_consumption".to_string(),
            description: "spike".to_string(),
        };

        let record = AnomalyRecord::try_from(row).unwrap();
        assert_eq!(record.cause, AnomalyCause::HighConsumption);
        assert_eq!(record.excess_kwh, 72.0);
    }

    #[test]
    fn anomaly_row_rejects_unknown_cause() {
        let row = AnomalyRow {
            timestamp: datetime!(2025-01-03 10:00:00 UTC),
            power_kwh: 100.0,
            excess_kwh: 0.0,
            cause: "equipment_wear".to_string(),
            description: String::new(),
        };

        assert!(AnomalyRecord::try_from(row).is_err());
    }
}
