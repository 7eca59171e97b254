use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::CircuitState;

// ============================================================================
// Health Check Abstractions
// ============================================================================
//
// Components report a `HealthStatus`; the health monitor aggregates them.
// Anything that can be probed on a timer implements `HealthCheck`.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

/// Health information for a component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }
}

/// A dependency probed periodically by the health monitor
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn component(&self) -> &'static str;

    async fn check(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_mapping() {
        assert!(HealthStatus::from(CircuitState::Closed).is_healthy());
        assert!(HealthStatus::from(CircuitState::HalfOpen).is_degraded());
        assert!(HealthStatus::from(CircuitState::Open).is_unhealthy());
    }
}
