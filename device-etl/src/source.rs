use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use etl_common::kafka::{BatchConsumer, ReceivedMessage};

use crate::error::SourceError;
use crate::types::{Position, RawRecord};

/// Where raw records come from.
#[async_trait]
pub trait RecordSource: Send {
    /// Up to `max_records` records, in the order the source delivered them. Waits at most
    /// `max_wait` for them; an empty result means nothing arrived in time.
    async fn fetch_next(
        &mut self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Persist that everything up to and including these offsets has been processed.
    async fn commit(&mut self, positions: &BTreeMap<i32, i64>) -> Result<(), SourceError>;
}

pub struct KafkaRecordSource {
    consumer: BatchConsumer,
}

impl KafkaRecordSource {
    pub fn new(consumer: BatchConsumer) -> Self {
        Self { consumer }
    }
}

impl From<ReceivedMessage> for RawRecord {
    fn from(message: ReceivedMessage) -> Self {
        RawRecord {
            key: message.key,
            value: message.payload,
            position: Position::new(message.partition, message.offset),
        }
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn fetch_next(
        &mut self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let messages = self.consumer.fetch(max_records, max_wait).await?;
        Ok(messages.into_iter().map(RawRecord::from).collect())
    }

    async fn commit(&mut self, positions: &BTreeMap<i32, i64>) -> Result<(), SourceError> {
        self.consumer.store_offsets(positions)?;
        Ok(())
    }
}
