use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use energy_client::domain::RawReading;
use futures::Stream;
use serde_json::{Map, Value};

use super::fields;
use crate::pipeline::{Envelope, PipelineError, Source};

/// CSV source for raw telemetry.
///
/// Columns are matched by header name using the same alias table as the JSON
/// source (`temp`/`temperature`, ...). Empty cells are treated as missing.
pub struct RawReadingCsvFileSource {
    path: PathBuf,
}

impl RawReadingCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn record_to_object(record: &StringRecord, headers: &StringRecord) -> Map<String, Value> {
    headers
        .iter()
        .zip(record.iter())
        .map(|(h, cell)| {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            (h.trim().to_string(), value)
        })
        .collect()
}

#[async_trait::async_trait]
impl Source<RawReading> for RawReadingCsvFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<RawReading>, PipelineError>> + Send>> {
        // Blocking reader inside a single task; export files are small enough.
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open CSV file: {e}")));
                    return;
                }
            };
            let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                let parsed = result
                    .map_err(|e| PipelineError::MalformedRecord(format!("failed to read CSV record: {e}")))
                    .and_then(|record| fields::raw_reading_from_object(&record_to_object(&record, &headers)));

                match parsed {
                    Ok(reading) => yield Ok(Envelope::now(reading)),
                    Err(e) => {
                        metrics::counter!("raw_reading_parse_errors_total").increment(1);
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}
