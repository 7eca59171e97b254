// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - order    placing orders, the OrderCreated fact
// - pricing  price lookup collaborator used before an order is assembled
// - kitchen  idempotent downstream reaction to OrderCreated
//
// Storage and transport live outside this layer, behind traits.
//
// ============================================================================

pub mod kitchen;
pub mod order;
pub mod pricing;
