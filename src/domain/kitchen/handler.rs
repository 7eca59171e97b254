use async_trait::async_trait;
use std::sync::Arc;

use super::value_objects::KitchenTicket;
use crate::domain::order::OrderCreated;
use crate::messaging::{EventHandler, HandlerError};
use crate::store::{KitchenTicketStore, StoreError};
use crate::utils::IsTransient;

pub struct KitchenEventHandler {
    tickets: Arc<dyn KitchenTicketStore>,
}

impl KitchenEventHandler {
    pub fn new(tickets: Arc<dyn KitchenTicketStore>) -> Self {
        Self { tickets }
    }
}

fn classify(err: StoreError) -> HandlerError {
    if err.is_transient() {
        HandlerError::Transient(err.to_string())
    } else {
        HandlerError::Permanent(err.to_string())
    }
}

#[async_trait]
impl EventHandler for KitchenEventHandler {
    async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
        let ticket = KitchenTicket::accept(event);
        let inserted = self.tickets.upsert_ticket(&ticket).await.map_err(classify)?;

        if inserted {
            tracing::info!(
                order_id = event.order_id,
                user_id = event.user_id,
                "🍳 Kitchen ticket accepted"
            );
        } else {
            tracing::debug!(order_id = event.order_id, "Duplicate OrderCreated, ticket already exists");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::kitchen::KitchenStatus;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn event(order_id: i64) -> OrderCreated {
        OrderCreated {
            order_id,
            user_id: 7,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let store = MemoryStore::new();
        let handler = KitchenEventHandler::new(Arc::new(store.clone()));

        let created = event(42);
        handler.handle(&created).await.unwrap();
        let after_first = store.tickets();

        handler.handle(&created).await.unwrap();
        assert_eq!(store.tickets(), after_first);
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].status, KitchenStatus::Accepted);
    }

    #[tokio::test]
    async fn test_store_outage_is_transient() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let handler = KitchenEventHandler::new(Arc::new(store.clone()));

        let err = handler.handle(&event(1)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));
        assert!(store.tickets().is_empty());
    }
}
