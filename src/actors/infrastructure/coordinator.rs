use kameo::actor::ActorRef;
use kameo::Actor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DlqActor, DlqClient, GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
use crate::actors::core::{HealthCheck, HealthStatus};
use crate::messaging::DeadLetterSink;
use crate::metrics::{HealthProbe, Metrics};

// ============================================================================
// Coordinator - Owns background work and its shutdown
// ============================================================================
//
// Responsibilities:
// - Starts the infrastructure actors (HealthMonitorActor, DlqActor)
// - Runs the long-lived pipeline tasks (outbox relay, consumer) with a
//   shared cancellation token
// - Reports each task's health; a task that ends before shutdown is
//   reported unhealthy
// - Coordinates graceful shutdown
//
// Hierarchy:
//   Coordinator
//   ├── HealthMonitorActor (periodic probes)
//   ├── DlqActor
//   ├── outbox_relay task
//   └── consumer task
//
// ============================================================================

pub struct Coordinator {
    cancel: CancellationToken,
    health_monitor: ActorRef<HealthMonitorActor>,
    dlq_actor: ActorRef<DlqActor>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Coordinator {
    pub fn start(
        checks: Vec<Arc<dyn HealthCheck>>,
        check_interval: Duration,
        dead_letter_sink: Arc<dyn DeadLetterSink>,
        probe: HealthProbe,
        metrics: Arc<Metrics>,
    ) -> Self {
        tracing::info!("🎯 Coordinator starting infrastructure actors");
        let cancel = CancellationToken::new();

        let health_monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(
            checks,
            check_interval,
            cancel.child_token(),
            probe,
            metrics.clone(),
        ));
        let dlq_actor = DlqActor::spawn(DlqActor::new(dead_letter_sink, metrics));

        Self {
            cancel,
            health_monitor,
            dlq_actor,
            tasks: Vec::new(),
        }
    }

    /// Dead-letter sink for partition workers, routed through the DLQ actor
    pub fn dead_letters(&self) -> Arc<dyn DeadLetterSink> {
        Arc::new(DlqClient::new(self.dlq_actor.clone()))
    }

    pub fn health_monitor(&self) -> &ActorRef<HealthMonitorActor> {
        &self.health_monitor
    }

    /// Run `task` until shutdown. It receives a token that fires on shutdown
    /// and must return promptly once it does.
    pub fn spawn<F, Fut>(&mut self, component: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        let health = self.health_monitor.clone();
        let work = task(cancel.clone());

        let handle = tokio::spawn(async move {
            report(&health, component, HealthStatus::Healthy, "running").await;
            work.await;

            if !cancel.is_cancelled() {
                tracing::error!(component = component, "Pipeline task stopped unexpectedly");
                report(
                    &health,
                    component,
                    HealthStatus::Unhealthy("stopped unexpectedly".to_string()),
                    "stopped",
                )
                .await;
            }
        });

        tracing::info!(component = component, "Started pipeline task");
        self.tasks.push((component, handle));
    }

    pub async fn system_health(&self) -> Option<SystemHealth> {
        match self.health_monitor.ask(GetSystemHealth).await {
            Ok(health) => Some(health),
            Err(e) => {
                tracing::error!(error = ?e, "Failed to get system health");
                None
            }
        }
    }

    /// Cancel every task, wait up to `grace` for each, then stop the actors.
    /// Tasks still running after the grace period are aborted.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!("🛑 Coordinator shutting down");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        for (component, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::info!(component = component, "Pipeline task stopped"),
                Ok(Err(e)) => tracing::error!(component = component, error = %e, "Pipeline task panicked"),
                Err(_) => {
                    tracing::warn!(component = component, "Pipeline task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Err(e) = self.dlq_actor.stop_gracefully().await {
            tracing::warn!(error = ?e, "DlqActor already stopped");
        }
        if let Err(e) = self.health_monitor.stop_gracefully().await {
            tracing::warn!(error = ?e, "HealthMonitorActor already stopped");
        }
        tracing::info!("🛑 Coordinator stopped");
    }
}

async fn report(
    health: &ActorRef<HealthMonitorActor>,
    component: &'static str,
    status: HealthStatus,
    details: &str,
) {
    let update = UpdateHealth {
        component: component.to_string(),
        status,
        details: Some(details.to_string()),
    };
    if let Err(e) = health.tell(update).await {
        tracing::warn!(component = component, error = ?e, "Failed to report component health");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::testing::RecordingDeadLetters;

    fn coordinator() -> Coordinator {
        Coordinator::start(
            Vec::new(),
            Duration::from_secs(60),
            Arc::new(RecordingDeadLetters::new()),
            HealthProbe::new(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    async fn component_status(coordinator: &Coordinator, component: &str) -> Option<HealthStatus> {
        coordinator
            .system_health()
            .await
            .and_then(|health| health.components.get(component).map(|c| c.status.clone()))
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let mut coordinator = coordinator();
        coordinator.spawn("outbox_relay", |cancel| async move {
            cancel.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            component_status(&coordinator, "outbox_relay").await,
            Some(HealthStatus::Healthy)
        );

        tokio::time::timeout(Duration::from_secs(2), coordinator.shutdown(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_task_ending_early_is_unhealthy() {
        let mut coordinator = coordinator();
        coordinator.spawn("consumer", |_cancel| async {});

        let status = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(HealthStatus::Unhealthy(reason)) =
                    component_status(&coordinator, "consumer").await
                {
                    return reason;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(status.contains("unexpectedly"));
        coordinator.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stuck_task_is_aborted_after_grace() {
        let mut coordinator = coordinator();
        coordinator.spawn("stuck", |_cancel| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        tokio::time::timeout(Duration::from_secs(2), coordinator.shutdown(Duration::from_millis(50)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dead_letters_route_through_actor() {
        let sink = Arc::new(RecordingDeadLetters::new());
        let coordinator = Coordinator::start(
            Vec::new(),
            Duration::from_secs(60),
            sink.clone(),
            HealthProbe::new(),
            Arc::new(Metrics::new().unwrap()),
        );

        let message = crate::messaging::InboundMessage {
            topic: "user-order".to_string(),
            partition: 0,
            offset: 1,
            key: None,
            payload: None,
        };
        let letter = crate::messaging::DeadLetter::from_message(&message, "undecodable payload", 0);
        coordinator.dead_letters().write(&letter).await.unwrap();

        assert_eq!(sink.letters().len(), 1);
        coordinator.shutdown(Duration::from_secs(1)).await;
    }
}
