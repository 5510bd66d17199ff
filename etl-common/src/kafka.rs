use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};

/// A message copied out of the consumer's buffers, so it can outlive the poll that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Empty when the producer did not set a key.
    pub key: Vec<u8>,
    /// Empty for tombstones and other payload-less messages.
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Single topic consumer that hands out bounded chunks of messages.
///
/// Offsets are never stored automatically: the caller decides, via `store_offsets`, when a
/// message counts as processed. Stored offsets are then committed in the background by
/// librdkafka's auto-commit, so a crash between the two can replay already processed messages.
pub struct BatchConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl BatchConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config.set("security.protocol", "ssl").set(
                "enable.ssl.certificate.verification",
                common_config.kafka_verify_ssl_certificate.to_string(),
            );
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive up to `max_messages`, giving up on waiting for more once `max_wait` has elapsed.
    /// Running out of time is not an error: whatever arrived so far is returned, possibly nothing.
    pub async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, KafkaError> {
        let deadline = Instant::now() + max_wait;
        let mut messages = Vec::with_capacity(max_messages.min(1024));

        while messages.len() < max_messages {
            let message = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(received) => received?,
                Err(_elapsed) => break,
            };

            messages.push(ReceivedMessage {
                key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                partition: message.partition(),
                offset: message.offset(),
            });
        }

        debug!(
            topic = self.topic,
            received = messages.len(),
            "fetched messages"
        );

        Ok(messages)
    }

    /// Mark everything up to and including the given offset of each partition as processed.
    pub fn store_offsets(&self, offsets: &BTreeMap<i32, i64>) -> Result<(), KafkaError> {
        for (partition, offset) in offsets {
            self.consumer
                .store_offset(&self.topic, *partition, *offset)?;
        }
        Ok(())
    }
}
