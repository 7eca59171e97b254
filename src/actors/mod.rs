// ============================================================================
// Actors Module
// ============================================================================
//
// Structure:
// - core/           - Health abstractions (HealthStatus, HealthCheck)
// - infrastructure/ - DLQ and health monitor actors, task Coordinator
//
// Note: Order ingestion uses the command handler, NOT actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

pub use self::core::{ComponentHealth, HealthCheck, HealthStatus};
pub use infrastructure::{
    BrokerHealthCheck, Coordinator, DlqActor, DlqClient, DlqStats, GetDlqStats, GetSystemHealth,
    HealthMonitorActor, ParkMessage, StoreHealthCheck, SystemHealth, UpdateHealth,
};
