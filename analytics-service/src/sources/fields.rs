//! Field lookup at the ingestion boundary.
//!
//! Exports from different SCADA/ERP systems name the same column differently
//! (`temp` vs `temperature`). Every alias set is declared here once and
//! resolved by [`lookup`], which returns the first non-null candidate in
//! declaration order.

use energy_client::domain::{RawReading, DEFAULT_INSTALLATION_ID};
use serde_json::{Map, Value};
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    OffsetDateTime, PrimitiveDateTime,
};

use crate::pipeline::PipelineError;

pub const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts"];
pub const INSTALLATION_KEYS: &[&str] = &["installation_id"];
pub const POWER_KEYS: &[&str] = &["power_kwh"];
pub const LOAD_KEYS: &[&str] = &["load_percent"];
pub const TEMPERATURE_KEYS: &[&str] = &["temperature", "temp"];
pub const PRESSURE_KEYS: &[&str] = &["pressure"];

const NAIVE_FORMATS: &[&[FormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
];

/// First non-null value among `keys`, in order.
pub fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

fn value_as_f64(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|x| x.is_finite())
}

fn required_f64(obj: &Map<String, Value>, keys: &[&str]) -> Result<f64, PipelineError> {
    let name = keys[0];
    let v = lookup(obj, keys)
        .ok_or_else(|| PipelineError::MalformedRecord(format!("missing field '{name}'")))?;
    value_as_f64(v).ok_or_else(|| PipelineError::MalformedRecord(format!("invalid {name} '{v}'")))
}

fn optional_f64(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    lookup(obj, keys).and_then(value_as_f64)
}

/// Parse a telemetry timestamp.
///
/// Accepts RFC 3339 and offset-less `YYYY-MM-DD[ T]HH:MM:SS[.fff]`, the
/// latter taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime, PipelineError> {
    let s = s.trim();
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(ts);
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| PrimitiveDateTime::parse(s, fmt).ok())
        .map(PrimitiveDateTime::assume_utc)
        .ok_or_else(|| PipelineError::MalformedRecord(format!("invalid timestamp '{s}'")))
}

/// Build a [`RawReading`] from one decoded record.
///
/// Missing or unparsable `timestamp`, `power_kwh` and `load_percent` fail the
/// record. Optional measurements that do not parse are treated as absent.
pub fn raw_reading_from_object(obj: &Map<String, Value>) -> Result<RawReading, PipelineError> {
    let ts_value = lookup(obj, TIMESTAMP_KEYS)
        .ok_or_else(|| PipelineError::MalformedRecord("missing field 'timestamp'".to_string()))?;
    let timestamp = match ts_value {
        Value::String(s) => parse_timestamp(s)?,
        other => {
            return Err(PipelineError::MalformedRecord(format!("invalid timestamp '{other}'")));
        }
    };

    let installation_id = match lookup(obj, INSTALLATION_KEYS) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_INSTALLATION_ID.to_string(),
    };

    Ok(RawReading {
        timestamp,
        installation_id,
        power_kwh: required_f64(obj, POWER_KEYS)?,
        load_percent: required_f64(obj, LOAD_KEYS)?,
        temperature: optional_f64(obj, TEMPERATURE_KEYS),
        pressure: optional_f64(obj, PRESSURE_KEYS),
    })
}

/// Same as [`raw_reading_from_object`] for an arbitrary JSON value.
pub fn raw_reading_from_value(value: &Value) -> Result<RawReading, PipelineError> {
    match value {
        Value::Object(obj) => raw_reading_from_object(obj),
        other => Err(PipelineError::MalformedRecord(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}
