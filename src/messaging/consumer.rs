use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    Message, Offset, TopicPartitionList,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, OffsetCommitter, PartitionDispatcher, StreamError};
use crate::config::KafkaConfig;

// ============================================================================
// Redpanda / Kafka Consumer
// ============================================================================
//
// Auto-commit is off: offsets are committed by the partition workers only
// after a message is settled (acked or parked), so a crash redelivers
// everything after the last settled message.
//
// ============================================================================

pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl RedpandaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.as_str())
            .set("group.id", config.group_id.as_str())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Subscribed Redpanda consumer"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
        })
    }

    pub fn committer(&self) -> KafkaCommitter {
        KafkaCommitter {
            consumer: self.consumer.clone(),
        }
    }

    /// Feed every received message to the dispatcher until cancelled, then
    /// drain the partition workers.
    pub async fn run(self, mut dispatcher: PartitionDispatcher, cancel: CancellationToken) {
        tracing::info!(topic = %self.topic, "🔄 Consumer loop started");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => InboundMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec),
                },
                Err(e) => {
                    tracing::warn!(error = %e, topic = %self.topic, "Error receiving message");
                    continue;
                }
            };

            tracing::debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Received message"
            );

            if let Err(e) = dispatcher.dispatch(message).await {
                tracing::error!(error = %e, "Failed to hand message to partition worker");
                break;
            }
        }

        dispatcher.shutdown().await;
        tracing::info!(topic = %self.topic, "Consumer loop stopped");
    }
}

pub struct KafkaCommitter {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl OffsetCommitter for KafkaCommitter {
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), StreamError> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(topic, partition, Offset::Offset(next_offset))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }
}
