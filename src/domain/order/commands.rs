use super::errors::ValidationError;
use super::value_objects::{ProductId, RestaurantId, UserId};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedItem {
    pub product_id: ProductId,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub items: Vec<RequestedItem>,
    /// Accepted for forward compatibility, not persisted yet
    pub delivery_address: Option<String>,
}

impl PlaceOrder {
    /// Checks that can run before any collaborator is called
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id <= 0 {
            return Err(ValidationError::InvalidIdentifier {
                field: "user_id",
                value: self.user_id,
            });
        }
        if self.restaurant_id <= 0 {
            return Err(ValidationError::InvalidIdentifier {
                field: "restaurant_id",
                value: self.restaurant_id,
            });
        }
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }
        if let Some(bad) = self.items.iter().find(|item| item.quantity < 1) {
            return Err(ValidationError::InvalidQuantity {
                product_id: bad.product_id,
                quantity: bad.quantity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(items: Vec<RequestedItem>) -> PlaceOrder {
        PlaceOrder {
            user_id: 7,
            restaurant_id: 3,
            items,
            delivery_address: None,
        }
    }

    #[test]
    fn test_valid_command() {
        let cmd = command(vec![RequestedItem {
            product_id: 101,
            quantity: 2,
        }]);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_empty_items_rejected() {
        assert_eq!(command(vec![]).validate(), Err(ValidationError::EmptyItems));
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let cmd = command(vec![RequestedItem {
            product_id: 5,
            quantity: -1,
        }]);
        assert_eq!(
            cmd.validate(),
            Err(ValidationError::InvalidQuantity {
                product_id: 5,
                quantity: -1
            })
        );
    }

    #[test]
    fn test_non_positive_user_rejected() {
        let mut cmd = command(vec![RequestedItem {
            product_id: 5,
            quantity: 1,
        }]);
        cmd.user_id = 0;
        assert!(matches!(
            cmd.validate(),
            Err(ValidationError::InvalidIdentifier { field: "user_id", .. })
        ));
    }
}
