// ============================================================================
// Store Layer - Orders, Outbox, Kitchen Tickets
// ============================================================================
//
// Traits describing what the pipeline needs from durable storage, with a
// PostgreSQL implementation (sqlx) and an in-memory one used by tests.
//
// The outbox row is written by `OrderStore::create` in the same transaction
// as the order; nothing else ever inserts outbox rows.
//
// ============================================================================

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::kitchen::KitchenTicket;
use crate::domain::order::{NewOrder, Order, OrderId};
use crate::outbox::OutboxEvent;
use crate::utils::IsTransient;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Order {0} not found")]
    NotFound(OrderId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Injected(_) => true,
            StoreError::Database(err) => is_transient_sqlx(err),
            StoreError::NotFound(_) | StoreError::Corrupt(_) => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            // 08xxx connection exceptions, 40001 serialization failure, 40P01 deadlock,
            // 57P0x admin shutdown / cannot connect now
            .map(|code| code.starts_with("08") || code == "40001" || code == "40P01" || code.starts_with("57P0"))
            .unwrap_or(false),
        _ => false,
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order header, all items (one batched write) and the
    /// `OrderCreated` outbox row as one atomic unit. Returns the new id.
    async fn create(&self, order: &NewOrder) -> Result<OrderId, StoreError>;

    /// Header and items read from one consistent snapshot.
    /// `StoreError::NotFound` when no header matches.
    async fn get_by_id(&self, id: OrderId) -> Result<Order, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Exclusively claim up to `limit` pending events, oldest first.
    /// An empty claim means nothing is pending or another relay holds the claim.
    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxClaim>, StoreError>;
}

/// A claimed batch of pending events. Changes become visible only on
/// `commit`; dropping the claim releases the rows untouched.
#[async_trait]
pub trait OutboxClaim: Send {
    fn events(&self) -> &[OutboxEvent];

    async fn mark_published(&mut self, ids: &[i64]) -> Result<(), StoreError>;

    async fn record_failure(&mut self, id: i64, error: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Downstream projection written by the kitchen handler
#[async_trait]
pub trait KitchenTicketStore: Send + Sync {
    /// Insert the ticket unless one already exists for its order.
    /// Returns true when this call inserted it.
    async fn upsert_ticket(&self, ticket: &KitchenTicket) -> Result<bool, StoreError>;

    async fn get_ticket(&self, order_id: OrderId) -> Result<Option<KitchenTicket>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::NotFound(1).is_transient());
        assert!(!StoreError::Corrupt("x".into()).is_transient());
    }
}
