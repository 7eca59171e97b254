use chrono::Utc;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use super::commands::PlaceOrder;
use super::errors::OrderError;
use super::value_objects::{NewOrder, Order, OrderId, OrderItem};
use crate::domain::pricing::PriceResolver;
use crate::metrics::Metrics;
use crate::store::OrderStore;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → validation → pricing → Order Store (order + outbox)
//
// Success means the order and its OrderCreated outbox event are durably
// committed together; failure means neither exists. Publishing happens later,
// in the relay, and never fails a request.
//
// ============================================================================

pub struct OrderCommandHandler {
    store: Arc<dyn OrderStore>,
    pricing: Arc<dyn PriceResolver>,
    metrics: Option<Arc<Metrics>>,
}

impl OrderCommandHandler {
    pub fn new(store: Arc<dyn OrderStore>, pricing: Arc<dyn PriceResolver>) -> Self {
        Self {
            store,
            pricing,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Place an order. Everything, including pricing, must finish before
    /// `deadline`; an expired deadline rolls back the store transaction.
    pub async fn place_order(
        &self,
        command: PlaceOrder,
        deadline: Instant,
    ) -> Result<OrderId, OrderError> {
        let request_id = Uuid::now_v7();
        let started = StdInstant::now();

        let result = timeout_at(deadline, self.place_order_inner(&command, request_id))
            .await
            .unwrap_or(Err(OrderError::DeadlineExceeded("place_order")));

        match &result {
            Ok(order_id) => {
                tracing::info!(
                    request_id = %request_id,
                    order_id = order_id,
                    user_id = command.user_id,
                    restaurant_id = command.restaurant_id,
                    items = command.items.len(),
                    "✅ Order persisted with pending OrderCreated event"
                );
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    user_id = command.user_id,
                    category = ?e.category(),
                    error = %e,
                    "Order rejected"
                );
            }
        }

        if let Some(metrics) = &self.metrics {
            let failure = result.as_ref().err().map(OrderError::label);
            metrics.record_request("place_order", started.elapsed().as_secs_f64(), failure);
            if result.is_ok() {
                metrics.orders_placed_total.inc();
            }
        }

        result
    }

    async fn place_order_inner(
        &self,
        command: &PlaceOrder,
        request_id: Uuid,
    ) -> Result<OrderId, OrderError> {
        command.validate()?;

        let mut items = Vec::with_capacity(command.items.len());
        for requested in &command.items {
            let price = self
                .pricing
                .resolve(command.restaurant_id, requested.product_id)
                .await?;
            items.push(OrderItem {
                product_id: requested.product_id,
                quantity: requested.quantity,
                price,
            });
        }

        let order = NewOrder::new(command.user_id, command.restaurant_id, items, Utc::now())?;
        tracing::debug!(request_id = %request_id, user_id = order.user_id, "Order assembled, persisting");

        Ok(self.store.create(&order).await?)
    }

    pub async fn get_order(&self, id: OrderId, deadline: Instant) -> Result<Order, OrderError> {
        let started = StdInstant::now();

        let result = match timeout_at(deadline, self.store.get_by_id(id)).await {
            Ok(found) => found.map_err(OrderError::from),
            Err(_) => Err(OrderError::DeadlineExceeded("get_order")),
        };

        if let Some(metrics) = &self.metrics {
            let failure = result.as_ref().err().map(OrderError::label);
            metrics.record_request("get_order", started.elapsed().as_secs_f64(), failure);
        }

        result
    }
}
