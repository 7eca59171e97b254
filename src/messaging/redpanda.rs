use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use super::{DeadLetter, DeadLetterSink, EventPublisher, StreamError, StreamMessage};
use crate::config::KafkaConfig;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redpanda / Kafka Producer
// ============================================================================

pub struct RedpandaProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, StreamError> {
        let idempotent = config.required_acks == -1;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.as_str())
            .set("message.timeout.ms", config.producer_timeout_ms.to_string())
            .set("acks", config.required_acks.to_string())
            // keeps per-key order intact across internal producer retries
            .set("enable.idempotence", idempotent.to_string())
            .create()?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            required_acks = config.required_acks,
            "Created Redpanda producer"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            send_timeout: config.producer_timeout(),
            circuit_breaker: CircuitBreaker::new("redpanda", CircuitBreakerConfig::default()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send one record and wait for the broker acknowledgment
    pub async fn send_raw(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
        headers: Option<OwnedHeaders>,
    ) -> Result<(), StreamError> {
        let result = self
            .circuit_breaker
            .call(async {
                let mut record = FutureRecord::<[u8], [u8]>::to(topic);
                if let Some(key) = key {
                    record = record.key(key);
                }
                if let Some(payload) = payload {
                    record = record.payload(payload);
                }
                if let Some(headers) = headers {
                    record = record.headers(headers);
                }

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map_err(|(e, _)| StreamError::Kafka(e))?;

                Ok::<(), StreamError>(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(topic = %topic, "Circuit breaker open - Redpanda unavailable");
                Err(StreamError::CircuitOpen("redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}

#[async_trait]
impl EventPublisher for RedpandaProducer {
    async fn publish(&self, message: &StreamMessage) -> Result<(), StreamError> {
        self.send_raw(
            &self.topic,
            Some(message.key.as_bytes()),
            Some(message.value.as_bytes()),
            None,
        )
        .await?;

        tracing::debug!(topic = %self.topic, key = %message.key, "Published to Redpanda");
        Ok(())
    }
}

// ============================================================================
// Dead-letter topic writer
// ============================================================================

/// Writes parked messages to the dead-letter topic, keeping the original key
/// and value and describing the failure in headers.
pub struct RedpandaDeadLetterSink {
    producer: std::sync::Arc<RedpandaProducer>,
    topic: String,
}

impl RedpandaDeadLetterSink {
    pub fn new(producer: std::sync::Arc<RedpandaProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

fn dead_letter_headers(letter: &DeadLetter) -> OwnedHeaders {
    let partition = letter.partition.to_string();
    let offset = letter.offset.to_string();
    let attempts = letter.attempts.to_string();
    let parked_at = letter.parked_at.to_rfc3339();

    OwnedHeaders::new()
        .insert(Header { key: "dlq.source_topic", value: Some(letter.source_topic.as_str()) })
        .insert(Header { key: "dlq.partition", value: Some(partition.as_str()) })
        .insert(Header { key: "dlq.offset", value: Some(offset.as_str()) })
        .insert(Header { key: "dlq.attempts", value: Some(attempts.as_str()) })
        .insert(Header { key: "dlq.reason", value: Some(letter.reason.as_str()) })
        .insert(Header { key: "dlq.parked_at", value: Some(parked_at.as_str()) })
}

#[async_trait]
impl DeadLetterSink for RedpandaDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> Result<(), StreamError> {
        self.producer
            .send_raw(
                &self.topic,
                letter.key.as_deref(),
                letter.payload.as_deref(),
                Some(dead_letter_headers(letter)),
            )
            .await
    }
}
