use std::{pin::Pin, time::SystemTime};

use futures::Stream;

pub mod orchestrator;

pub use orchestrator::{AnalysisResult, IngestReport, Orchestrator, RunStatus};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// A single raw record could not be parsed; the batch continues without it.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("source error: {0}")]
    Source(String),
}

impl PipelineError {
    /// Whether the error only affects the record it was raised for.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::MalformedRecord(_))
    }
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;
}
