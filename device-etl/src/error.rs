use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::pipeline::PipelineState;
use crate::types::PositionRange;

/// Why a single payload could not be turned into a record at all. Fields that are merely
/// missing or mistyped are not errors, they decode to `None`.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("received empty payload")]
    EmptyPayload,
    #[error("payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a json object")]
    NotAnObject,
}

impl DecodeError {
    /// Short, stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::EmptyPayload => "empty_payload",
            DecodeError::InvalidUtf8(_) => "invalid_utf8",
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::NotAnObject => "not_an_object",
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{0:?} is not a valid destination, expected [schema.]table")]
    InvalidDestination(String),
    #[error("a database error occurred while writing the batch: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Reasons the pipeline stops for good. Each of these leaves the batch in question
/// uncommitted, so it is read again when the pipeline is restarted.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("batch {batch_id} covering {range} failed to write after {attempts} attempts: {source}")]
    WriteFailed {
        batch_id: u64,
        range: PositionRange,
        attempts: u32,
        source: SinkError,
    },
    #[error("batch {batch_id} covering {range} was written but could not be committed: {source}")]
    CommitFailed {
        batch_id: u64,
        range: PositionRange,
        source: SourceError,
    },
    #[error("failed to fetch the next batch: {0}")]
    FetchFailed(#[source] SourceError),
    #[error("pipeline has already reached the terminal {0:?} state")]
    Terminated(PipelineState),
}
