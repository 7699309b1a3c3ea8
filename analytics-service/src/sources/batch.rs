use energy_client::domain::RawReading;
use futures::{stream, Stream};
use serde_json::Value;

use super::fields;
use crate::pipeline::{Envelope, PipelineError, Source};

/// In-memory batch of decoded JSON records, as handed over by a request
/// handler or another ingestion collaborator.
#[derive(Debug, Clone, Default)]
pub struct JsonBatchSource {
    records: Vec<Value>,
}

impl JsonBatchSource {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }
}

#[async_trait::async_trait]
impl Source<RawReading> for JsonBatchSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<RawReading>, PipelineError>> + Send>> {
        let parsed: Vec<_> = self
            .records
            .iter()
            .map(|v| {
                fields::raw_reading_from_value(v).map(Envelope::now).map_err(|e| {
                    metrics::counter!("raw_reading_parse_errors_total").increment(1);
                    e
                })
            })
            .collect();
        Box::pin(stream::iter(parsed))
    }
}
