use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{OrderId, UserId};

// ============================================================================
// Order Events
// ============================================================================

/// Order Created - written to the outbox in the same transaction as the order.
///
/// Wire form: `{"order_id": 42, "user_id": 7, "timestamp": "2026-01-01T12:00:00Z"}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl OrderCreated {
    pub const EVENT_TYPE: &'static str = "OrderCreated";

    /// Stream key: all events of one user land on one partition, in order
    pub fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}
