use async_trait::async_trait;
use std::collections::HashMap;

use super::order::{ProductId, RestaurantId};

// ============================================================================
// Pricing Collaborator
// ============================================================================
//
// Ingestion asks this collaborator for each item's unit price before the order
// is assembled. The real pricing service lives elsewhere; `StaticPriceList`
// gives deterministic prices for tests and local runs.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Unknown product {product_id} for restaurant {restaurant_id}")]
    UnknownProduct {
        restaurant_id: RestaurantId,
        product_id: ProductId,
    },

    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PriceResolver: Send + Sync {
    /// Unit price in minor currency units
    async fn resolve(
        &self,
        restaurant_id: RestaurantId,
        product_id: ProductId,
    ) -> Result<i64, PricingError>;
}

/// Fixed price table. Products missing from the table get `default_price`,
/// or are rejected when no default is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceList {
    prices: HashMap<ProductId, i64>,
    default_price: Option<i64>,
}

impl StaticPriceList {
    pub fn new(prices: HashMap<ProductId, i64>, default_price: Option<i64>) -> Self {
        Self {
            prices,
            default_price,
        }
    }

    pub fn with_price(mut self, product_id: ProductId, price: i64) -> Self {
        self.prices.insert(product_id, price);
        self
    }
}

#[async_trait]
impl PriceResolver for StaticPriceList {
    async fn resolve(
        &self,
        restaurant_id: RestaurantId,
        product_id: ProductId,
    ) -> Result<i64, PricingError> {
        self.prices
            .get(&product_id)
            .copied()
            .or(self.default_price)
            .ok_or(PricingError::UnknownProduct {
                restaurant_id,
                product_id,
            })
    }
}
