use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ValidationError;
use super::events::OrderCreated;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Store-assigned order identity (BIGSERIAL, monotonic)
pub type OrderId = i64;
pub type UserId = i64;
pub type RestaurantId = i64;
pub type ProductId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Paid => "Paid",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// `Paid` and `Cancelled` are final as far as ingestion is concerned
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Created)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(OrderStatus::Created),
            "Paid" => Ok(OrderStatus::Paid),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A priced line item. `price` is the unit price in minor currency units.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub price: i64,
}

/// An order assembled by ingestion but not yet persisted (no id yet).
#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewOrder {
    /// Assemble an order in `Created` status. Rejects empty orders and
    /// items that break the quantity/price bounds.
    pub fn new(
        user_id: UserId,
        restaurant_id: RestaurantId,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }

        for item in &items {
            if item.quantity < 1 {
                return Err(ValidationError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.price < 0 {
                return Err(ValidationError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.price,
                });
            }
        }

        Ok(Self {
            user_id,
            restaurant_id,
            items,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        })
    }

    /// The fact published once this order is committed under `order_id`
    pub fn created_event(&self, order_id: OrderId) -> OrderCreated {
        OrderCreated {
            order_id,
            user_id: self.user_id,
            timestamp: self.created_at,
        }
    }

    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            user_id: self.user_id,
            restaurant_id: self.restaurant_id,
            items: self.items,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A persisted order with its items in submission order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Sum of `quantity * price` over all items, in minor units
    pub fn total(&self) -> i64 {
        self.items
            .iter()
            .map(|item| i64::from(item.quantity) * item.price)
            .sum()
    }
}
