// ============================================================================
// Messaging - Stream Wire Format, Producer, Consumer
// ============================================================================
//
// - `redpanda`  rdkafka producer (circuit breaker) + dead-letter sink
// - `consumer`  rdkafka consumer loop feeding the dispatcher
// - `dispatch`  per-partition workers, retry/park/ack, offset commits
// - `testing`   in-process doubles for the traits below (tests and the
//               `testing` feature only)
//
// ============================================================================

pub mod consumer;
pub mod dispatch;
pub mod redpanda;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::order::OrderCreated;
use crate::utils::IsTransient;

pub use consumer::RedpandaConsumer;
pub use consumer::KafkaCommitter;
pub use dispatch::{Delivery, HandlerPolicy, PartitionDispatcher, WorkerContext};
pub use redpanda::{RedpandaDeadLetterSink, RedpandaProducer};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(&'static str),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(String),
}

impl IsTransient for StreamError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::Unavailable(_) | StreamError::CircuitOpen(_) | StreamError::Kafka(_)
        )
    }
}

/// A record as it goes onto the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// UTF-8 decimal user id
    pub key: String,
    /// JSON `{order_id, user_id, timestamp}`
    pub value: String,
}

impl StreamMessage {
    pub fn from_event(event: &OrderCreated) -> Result<Self, StreamError> {
        Ok(Self {
            key: event.partition_key(),
            value: serde_json::to_string(event).map_err(StreamError::Encode)?,
        })
    }
}

/// A record as read from the stream, detached from the client's buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn decode(&self) -> Result<OrderCreated, StreamError> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| StreamError::Decode("message has no payload".to_string()))?;
        serde_json::from_slice(payload).map_err(|e| StreamError::Decode(e.to_string()))
    }
}

/// A message that could not be handled, parked for manual intervention
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub reason: String,
    pub attempts: u32,
    pub parked_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_message(message: &InboundMessage, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            source_topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            payload: message.payload.clone(),
            reason: reason.into(),
            attempts,
            parked_at: Utc::now(),
        }
    }
}

/// Publishes outbox events to the stream; success means the broker acked.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &StreamMessage) -> Result<(), StreamError>;
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, letter: &DeadLetter) -> Result<(), StreamError>;
}

/// Persists consumer progress. `next_offset` is the first offset not yet handled.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), StreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("transient handler failure: {0}")]
    Transient(String),

    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

impl IsTransient for HandlerError {
    fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Downstream reaction to `OrderCreated`. May be invoked more than once for
/// the same order and must converge to the same state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(payload: Option<&str>) -> InboundMessage {
        InboundMessage {
            topic: "user-order".into(),
            partition: 0,
            offset: 5,
            key: Some(b"7".to_vec()),
            payload: payload.map(|p| p.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_decode_order_created() {
        let message = inbound(Some(r#"{"order_id":42,"user_id":7,"timestamp":"2026-03-01T10:00:00Z"}"#));
        let event = message.decode().unwrap();
        assert_eq!(event.order_id, 42);
        assert_eq!(event.user_id, 7);
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert!(matches!(inbound(None).decode(), Err(StreamError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = inbound(Some("not json")).decode().unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_dead_letter_keeps_original_bytes() {
        let message = inbound(Some("payload"));
        let letter = DeadLetter::from_message(&message, "boom", 3);
        assert_eq!(letter.payload.as_deref(), Some(&b"payload"[..]));
        assert_eq!(letter.offset, 5);
        assert_eq!(letter.attempts, 3);
    }

    #[test]
    fn test_stream_errors_transient() {
        assert!(StreamError::Unavailable("x".into()).is_transient());
        assert!(StreamError::CircuitOpen("redpanda").is_transient());
        assert!(!StreamError::Decode("x".into()).is_transient());
        assert!(HandlerError::Transient("x".into()).is_transient());
        assert!(!HandlerError::Permanent("x".into()).is_transient());
    }
}
