// ============================================================================
// Order Domain - Ingestion side of the pipeline
// ============================================================================
//
// - Value objects (Order, NewOrder, OrderItem, OrderStatus)
// - Events (OrderCreated, the fact relayed through the outbox)
// - Commands (PlaceOrder)
// - Errors (ValidationError, OrderError + ErrorCategory)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use command_handler::*;
