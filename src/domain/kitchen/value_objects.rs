use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::order::{OrderCreated, OrderId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KitchenStatus {
    Accepted,
}

impl KitchenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KitchenStatus::Accepted => "Accepted",
        }
    }
}

impl fmt::Display for KitchenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KitchenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accepted" => Ok(KitchenStatus::Accepted),
            other => Err(format!("unknown kitchen status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitchenTicket {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: KitchenStatus,
    /// When the order was created upstream, not when the event arrived
    pub received_at: DateTime<Utc>,
}

impl KitchenTicket {
    pub fn accept(event: &OrderCreated) -> Self {
        Self {
            order_id: event.order_id,
            user_id: event.user_id,
            status: KitchenStatus::Accepted,
            received_at: event.timestamp,
        }
    }
}
