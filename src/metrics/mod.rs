// Private module declaration
mod server;

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

use crate::actors::HealthStatus;
use crate::utils::CircuitState;

// Re-export for public API
pub use server::{start_metrics_server, HealthProbe};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the three stages of the pipeline:
// - Ingestion (orders placed, failures by category, latency)
// - Outbox relay (published, publish failures, batch sizes)
// - Consumer (acked / parked messages, retries, DLQ, offset commits)
// plus circuit breaker and component health gauges.
//
// All metrics live in a per-instance registry scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Ingestion
    pub orders_placed_total: IntCounter,
    pub order_failures_total: IntCounterVec,
    pub request_duration: HistogramVec,

    // Outbox relay
    pub outbox_published_total: IntCounter,
    pub outbox_publish_failures_total: IntCounter,
    pub outbox_batch_size: IntGauge,
    pub outbox_batch_duration: Histogram,

    // Consumer
    pub consumer_messages_total: IntCounterVec,
    pub consumer_retries_total: IntCounter,
    pub handler_duration: Histogram,
    pub offset_commit_failures_total: IntCounter,

    // DLQ
    pub dlq_messages_total: IntCounter,
    pub dlq_write_failures_total: IntCounter,

    // Circuit breaker / health
    pub circuit_breaker_state: IntGauge,
    pub component_health: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let orders_placed_total =
            IntCounter::new("orders_placed_total", "Orders committed together with their outbox event")?;
        registry.register(Box::new(orders_placed_total.clone()))?;

        let order_failures_total = IntCounterVec::new(
            Opts::new("order_failures_total", "Rejected or failed order requests"),
            &["reason"],
        )?;
        registry.register(Box::new(order_failures_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("order_request_duration_seconds", "Ingestion request duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let outbox_published_total = IntCounter::new(
            "outbox_published_total",
            "Outbox events acknowledged by the broker and marked published",
        )?;
        registry.register(Box::new(outbox_published_total.clone()))?;

        let outbox_publish_failures_total = IntCounter::new(
            "outbox_publish_failures_total",
            "Outbox publish attempts rejected by the broker",
        )?;
        registry.register(Box::new(outbox_publish_failures_total.clone()))?;

        let outbox_batch_size = IntGauge::new("outbox_batch_size", "Events claimed by the last relay pass")?;
        registry.register(Box::new(outbox_batch_size.clone()))?;

        let outbox_batch_duration = Histogram::with_opts(
            HistogramOpts::new("outbox_batch_duration_seconds", "Relay pass duration, claim to commit")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(outbox_batch_duration.clone()))?;

        let consumer_messages_total = IntCounterVec::new(
            Opts::new("consumer_messages_total", "Consumed messages by final outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(consumer_messages_total.clone()))?;

        let consumer_retries_total =
            IntCounter::new("consumer_retries_total", "Handler attempts retried in place")?;
        registry.register(Box::new(consumer_retries_total.clone()))?;

        let handler_duration = Histogram::with_opts(
            HistogramOpts::new("handler_duration_seconds", "Single handler attempt duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(handler_duration.clone()))?;

        let offset_commit_failures_total =
            IntCounter::new("offset_commit_failures_total", "Consumer offset commits that failed")?;
        registry.register(Box::new(offset_commit_failures_total.clone()))?;

        let dlq_messages_total =
            IntCounter::new("dlq_messages_total", "Total messages in dead letter queue")?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_write_failures_total =
            IntCounter::new("dlq_write_failures_total", "Failed writes to the dead letter topic")?;
        registry.register(Box::new(dlq_write_failures_total.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "component_health_status",
                "Component health status (0=Unhealthy, 1=Degraded, 2=Healthy)",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            registry,
            orders_placed_total,
            order_failures_total,
            request_duration,
            outbox_published_total,
            outbox_publish_failures_total,
            outbox_batch_size,
            outbox_batch_duration,
            consumer_messages_total,
            consumer_retries_total,
            handler_duration,
            offset_commit_failures_total,
            dlq_messages_total,
            dlq_write_failures_total,
            circuit_breaker_state,
            component_health,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, operation: &str, duration_secs: f64, failure: Option<&str>) {
        self.request_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
        if let Some(reason) = failure {
            self.order_failures_total.with_label_values(&[reason]).inc();
        }
    }

    pub fn record_consumed(&self, outcome: &str) {
        self.consumer_messages_total.with_label_values(&[outcome]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }

    pub fn update_component_health(&self, component: &str, status: &HealthStatus) {
        let value = match status {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        };
        self.component_health.with_label_values(&[component]).set(value);
    }
}
