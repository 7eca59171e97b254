use super::value_objects::{OrderId, ProductId};
use crate::domain::pricing::PricingError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Errors
// ============================================================================

/// Bad input. Never retried, reported to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i32 },

    #[error("Invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: i64 },

    #[error("Unknown product {product_id} for restaurant {restaurant_id}")]
    UnknownProduct { restaurant_id: i64, product_id: ProductId },

    #[error("Invalid {field}: {value}")]
    InvalidIdentifier { field: &'static str, value: i64 },
}

/// Coarse category used by transports to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Transient,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Order {0} not found")]
    NotFound(OrderId),

    #[error("Order store temporarily unavailable: {0}")]
    TransientStore(#[source] StoreError),

    #[error("Order store failure: {0}")]
    Store(#[source] StoreError),

    #[error("Pricing service unavailable: {0}")]
    PricingUnavailable(String),

    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),
}

impl OrderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrderError::Validation(_) => ErrorCategory::Validation,
            OrderError::NotFound(_) => ErrorCategory::Conflict,
            OrderError::TransientStore(_)
            | OrderError::PricingUnavailable(_)
            | OrderError::DeadlineExceeded(_) => ErrorCategory::Transient,
            OrderError::Store(_) => ErrorCategory::Internal,
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation",
            OrderError::NotFound(_) => "not_found",
            OrderError::TransientStore(_) => "transient_store",
            OrderError::Store(_) => "store",
            OrderError::PricingUnavailable(_) => "pricing",
            OrderError::DeadlineExceeded(_) => "deadline",
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrderError::NotFound(id),
            err if err.is_transient() => OrderError::TransientStore(err),
            err => OrderError::Store(err),
        }
    }
}

impl From<PricingError> for OrderError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::UnknownProduct {
                restaurant_id,
                product_id,
            } => OrderError::Validation(ValidationError::UnknownProduct {
                restaurant_id,
                product_id,
            }),
            PricingError::Unavailable(reason) => OrderError::PricingUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_becomes_conflict() {
        let err = OrderError::from(StoreError::NotFound(9));
        assert!(matches!(err, OrderError::NotFound(9)));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_transient_store_error_category() {
        let err = OrderError::from(StoreError::Unavailable("pool timed out".into()));
        assert!(matches!(err, OrderError::TransientStore(_)));
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_corrupt_row_is_internal() {
        let err = OrderError::from(StoreError::Corrupt("bad status".into()));
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.label(), "store");
    }

    #[test]
    fn test_unknown_product_is_validation() {
        let err = OrderError::from(PricingError::UnknownProduct {
            restaurant_id: 3,
            product_id: 999,
        });
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.to_string().contains("999"));
    }
}
