// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Dead letter queue (kameo)
// - Health monitoring (kameo)
// - Coordination of pipeline tasks and shutdown
//
// ============================================================================

// Private module declarations
mod coordinator;
mod dlq;
mod health_monitor;

// Re-export for public API
pub use coordinator::Coordinator;
pub use dlq::{DlqActor, DlqClient, DlqStats, GetDlqStats, ParkMessage};
pub use health_monitor::{
    BrokerHealthCheck, GetSystemHealth, HealthMonitorActor, StoreHealthCheck, SystemHealth,
    UpdateHealth,
};
