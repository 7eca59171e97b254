// ============================================================================
// Kitchen Domain - Downstream reaction to OrderCreated
// ============================================================================
//
// Every created order becomes one kitchen ticket in `Accepted` state. The
// ticket is keyed by order id, so redelivered events leave it untouched.
//
// ============================================================================

pub mod handler;
pub mod value_objects;

pub use handler::KitchenEventHandler;
pub use value_objects::*;
