// ============================================================================
// Transactional Outbox
// ============================================================================
//
// Pending facts co-committed with order data and drained to the stream by
// the relay. An event moves Pending -> Published exactly once, and only the
// relay moves it.
//
// ============================================================================

pub mod relay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::order::{OrderCreated, OrderId};
use crate::messaging::{StreamError, StreamMessage};

pub use relay::{DrainReport, OutboxRelay, RelayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            other => Err(format!("unknown outbox status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: i64,
    pub order_id: OrderId,
    pub event_type: String,
    pub payload: OrderCreated,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Stream representation: key is the decimal user id, value the JSON payload
    pub fn to_stream_message(&self) -> Result<StreamMessage, StreamError> {
        StreamMessage::from_event(&self.payload)
    }
}
