use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::{Arc, PoisonError, RwLock};

use crate::actors::{HealthStatus, SystemHealth};

/// Latest system health, published by the health monitor and read by `/health`.
#[derive(Clone, Default)]
pub struct HealthProbe {
    latest: Arc<RwLock<Option<SystemHealth>>>,
}

impl HealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, health: SystemHealth) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(health);
    }

    pub fn snapshot(&self) -> Option<SystemHealth> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Start the metrics HTTP server
/// This should be called in a separate thread/runtime to avoid conflicts
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    probe: HealthProbe,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(probe.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

fn status_label(status: &HealthStatus) -> (&'static str, Option<&str>) {
    match status {
        HealthStatus::Healthy => ("healthy", None),
        HealthStatus::Degraded(reason) => ("degraded", Some(reason.as_str())),
        HealthStatus::Unhealthy(reason) => ("unhealthy", Some(reason.as_str())),
    }
}

async fn health_handler(probe: web::Data<HealthProbe>) -> impl Responder {
    let Some(health) = probe.snapshot() else {
        return HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "starting",
            "service": "order-pipeline"
        }));
    };

    let components: serde_json::Map<String, serde_json::Value> = health
        .components
        .iter()
        .map(|(name, component)| {
            let (status, reason) = status_label(&component.status);
            (
                name.clone(),
                serde_json::json!({
                    "status": status,
                    "reason": reason,
                    "details": component.details,
                    "last_check": component.last_check.to_rfc3339(),
                }),
            )
        })
        .collect();

    let (status, reason) = status_label(&health.overall_status);
    let body = serde_json::json!({
        "status": status,
        "reason": reason,
        "service": "order-pipeline",
        "checked_at": health.check_time.to_rfc3339(),
        "components": components,
    });

    if health.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}
