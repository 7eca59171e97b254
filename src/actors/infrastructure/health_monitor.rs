use async_trait::async_trait;
use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::actors::core::{ComponentHealth, HealthCheck, HealthStatus};
use crate::messaging::RedpandaProducer;
use crate::metrics::{HealthProbe, Metrics};
use crate::store::OrderStore;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status of all components (pushed or probed)
// - Probe dependencies on a timer (database, broker circuit breaker)
// - Aggregate system-wide health and publish it for /health
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Probes
// ============================================================================

pub struct StoreHealthCheck {
    store: Arc<dyn OrderStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    fn component(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> HealthStatus {
        match self.store.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}

pub struct BrokerHealthCheck {
    producer: Arc<RedpandaProducer>,
    metrics: Arc<Metrics>,
}

impl BrokerHealthCheck {
    pub fn new(producer: Arc<RedpandaProducer>, metrics: Arc<Metrics>) -> Self {
        Self { producer, metrics }
    }
}

#[async_trait]
impl HealthCheck for BrokerHealthCheck {
    fn component(&self) -> &'static str {
        "redpanda"
    }

    async fn check(&self) -> HealthStatus {
        let state = self.producer.circuit_state().await;
        self.metrics.update_circuit_breaker_state(state);
        HealthStatus::from(state)
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    checks: Vec<Arc<dyn HealthCheck>>,
    check_interval: Duration,
    cancel: CancellationToken,
    probe: HealthProbe,
    metrics: Arc<Metrics>,
}

impl HealthMonitorActor {
    pub fn new(
        checks: Vec<Arc<dyn HealthCheck>>,
        check_interval: Duration,
        cancel: CancellationToken,
        probe: HealthProbe,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            components: HashMap::new(),
            checks,
            check_interval,
            cancel,
            probe,
            metrics,
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }

    fn snapshot(&self) -> SystemHealth {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(checks = state.checks.len(), "HealthMonitorActor started");

        let checks = state.checks.clone();
        let cancel = state.cancel.clone();
        let check_interval = state.check_interval;

        // Schedule periodic health checks
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for check in &checks {
                    let status = check.check().await;
                    let update = UpdateHealth {
                        component: check.component().to_string(),
                        status,
                        details: None,
                    };
                    if actor_ref.tell(update).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let previous = self.components.get(&msg.component).map(|c| c.status.clone());
        if previous.as_ref() != Some(&msg.status) {
            match &msg.status {
                HealthStatus::Healthy => {
                    tracing::info!(component = %msg.component, "Component healthy")
                }
                status => tracing::warn!(component = %msg.component, status = ?status, "Component health changed"),
            }
        } else {
            tracing::debug!(component = %msg.component, status = ?msg.status, "Updated component health");
        }

        self.metrics.update_component_health(&msg.component, &msg.status);
        let health = ComponentHealth::new(msg.component.clone(), msg.status).with_details(msg.details);
        self.components.insert(msg.component, health);
        self.probe.publish(self.snapshot());
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn monitor(checks: Vec<Arc<dyn HealthCheck>>, probe: HealthProbe) -> (ActorRef<HealthMonitorActor>, CancellationToken) {
        let cancel = CancellationToken::new();
        let actor = HealthMonitorActor::spawn(HealthMonitorActor::new(
            checks,
            Duration::from_millis(10),
            cancel.clone(),
            probe,
            Arc::new(Metrics::new().unwrap()),
        ));
        (actor, cancel)
    }

    fn update(component: &str, status: HealthStatus) -> UpdateHealth {
        UpdateHealth {
            component: component.to_string(),
            status,
            details: None,
        }
    }

    #[tokio::test]
    async fn test_overall_status_is_worst_component() {
        let (actor, cancel) = monitor(Vec::new(), HealthProbe::new());

        actor.tell(update("outbox_relay", HealthStatus::Healthy)).await.unwrap();
        actor
            .tell(update("consumer", HealthStatus::Degraded("lagging".into())))
            .await
            .unwrap();
        let health = actor.ask(GetSystemHealth).await.unwrap();
        assert!(health.overall_status.is_degraded());

        actor
            .tell(update("postgres", HealthStatus::Unhealthy("down".into())))
            .await
            .unwrap();
        let health = actor.ask(GetSystemHealth).await.unwrap();
        assert!(health.overall_status.is_unhealthy());
        assert_eq!(health.components.len(), 3);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_periodic_probe_reports_store_outage() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let probe = HealthProbe::new();
        let checks: Vec<Arc<dyn HealthCheck>> = vec![Arc::new(StoreHealthCheck::new(Arc::new(store.clone())))];
        let (_actor, cancel) = monitor(checks, probe.clone());

        let reported = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(health) = probe.snapshot() {
                    if health.components.contains_key("postgres") {
                        return health;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(reported.overall_status.is_unhealthy());
        cancel.cancel();
    }
}
