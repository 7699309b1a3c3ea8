use std::path::PathBuf;

use async_stream::stream;
use energy_client::domain::RawReading;
use futures::Stream;
use serde_json::Value;

use super::fields;
use crate::pipeline::{Envelope, PipelineError, Source};

/// File source for raw telemetry exported as JSON.
///
/// Accepts either a single JSON array of records (the generator's
/// `raw_data.json`) or newline-delimited JSON, one record per line. Records
/// that fail to parse are yielded as `MalformedRecord` errors and the stream
/// carries on.
pub struct RawReadingJsonFileSource {
    path: PathBuf,
}

impl RawReadingJsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_errors_counter() {
    metrics::counter!("raw_reading_parse_errors_total").increment(1);
}

/// Split file contents into per-record results.
fn decode_records(contents: &str) -> Result<Vec<Result<Value, PipelineError>>, PipelineError> {
    if contents.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(contents)
            .map_err(|e| PipelineError::Source(format!("failed to parse JSON array: {e}")))?;
        return Ok(values.into_iter().map(Ok).collect());
    }

    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Value>(line).map_err(|e| {
                PipelineError::MalformedRecord(format!("line {}: invalid json: {e}", idx + 1))
            })
        })
        .collect())
}

#[async_trait::async_trait]
impl Source<RawReading> for RawReadingJsonFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<RawReading>, PipelineError>> + Send>> {
        let path = self.path.clone();
        let s = stream! {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    yield Err(PipelineError::Source(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )));
                    return;
                }
            };

            let records = match decode_records(&contents) {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for record in records {
                match record.and_then(|v| fields::raw_reading_from_value(&v)) {
                    Ok(reading) => yield Ok(Envelope::now(reading)),
                    Err(e) => {
                        parse_errors_counter();
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    async fn collect(path: &std::path::Path) -> Vec<Result<Envelope<RawReading>, PipelineError>> {
        RawReadingJsonFileSource::new(path).stream().await.collect().await
    }

    #[tokio::test]
    async fn reads_json_array_and_keeps_going_past_bad_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"timestamp": "2025-01-01 00:00:00", "power_kwh": 1500, "load_percent": 80, "temp": 10}},
                {{"timestamp": "not a date", "power_kwh": 1500, "load_percent": 80}},
                {{"timestamp": "2025-01-01 01:00:00", "power_kwh": 1400, "load_percent": 78}}
            ]"#
        )
        .unwrap();

        let items = collect(file.path()).await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(PipelineError::MalformedRecord(_))));
        assert_eq!(items[2].as_ref().unwrap().payload.power_kwh, 1400.0);
    }

    #[tokio::test]
    async fn reads_ndjson_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"timestamp": "2025-01-01T00:00:00Z", "power_kwh": 10, "load_percent": 5}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{broken").unwrap();
        writeln!(file, r#"{{"timestamp": "2025-01-01T01:00:00Z", "power_kwh": 12, "load_percent": 6}}"#).unwrap();

        let items = collect(file.path()).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().filter(|r| r.is_ok()).count(), 2);
        assert!(matches!(items[1], Err(PipelineError::MalformedRecord(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let items = collect(&dir.path().join("absent.json")).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Source(_))));
    }
}
