// ============================================================================
// Order Pipeline
// ============================================================================
//
// Transactional order ingestion with an outbox:
//   request → OrderCommandHandler → one transaction {order, items, outbox}
//   OutboxRelay → Redpanda (keyed by user id) → RedpandaConsumer
//   → PartitionDispatcher → KitchenEventHandler → offset commit
//
// ============================================================================

pub mod actors;
pub mod config;
pub mod domain;
pub mod grpc;
pub mod messaging;
pub mod metrics;
pub mod outbox;
pub mod store;
pub mod utils;
