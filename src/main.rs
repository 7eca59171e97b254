use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_pipeline::actors::{BrokerHealthCheck, Coordinator, HealthCheck, StoreHealthCheck};
use order_pipeline::config::AppConfig;
use order_pipeline::domain::kitchen::KitchenEventHandler;
use order_pipeline::domain::order::OrderCommandHandler;
use order_pipeline::domain::pricing::StaticPriceList;
use order_pipeline::grpc::{CreateOrderRequest, OrderGrpcService, OrderItemRequest};
use order_pipeline::messaging::{
    HandlerPolicy, PartitionDispatcher, RedpandaConsumer, RedpandaDeadLetterSink, RedpandaProducer,
    WorkerContext,
};
use order_pipeline::metrics::{self, HealthProbe, Metrics};
use order_pipeline::outbox::{OutboxRelay, RelayConfig};
use order_pipeline::store::PgStore;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // RUST_LOG wins over the configured filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str())),
        )
        .init();

    tracing::info!(environment = %config.environment, "🚀 Starting order pipeline");

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let probe = HealthProbe::new();
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    if config.metrics.enabled {
        let registry = Arc::new(metrics.registry().clone());
        let probe = probe.clone();
        let port = config.metrics.port;
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to build metrics runtime: {}", e);
                    return;
                }
            };
            rt.block_on(async {
                if let Err(e) = metrics::start_metrics_server(registry, probe, port).await {
                    tracing::error!("Metrics server error: {}", e);
                }
            });
        });
    }

    // === 2. Postgres (orders, outbox, kitchen tickets) ===
    tracing::info!(host = %config.postgres.host, database = %config.postgres.database, "Connecting to Postgres...");
    let store = Arc::new(PgStore::connect(&config.postgres).await?);
    store.ensure_schema().await?;

    // === 3. Redpanda producer (with circuit breaker) ===
    let producer = Arc::new(RedpandaProducer::new(&config.kafka)?);
    let dead_letter_sink = Arc::new(RedpandaDeadLetterSink::new(
        producer.clone(),
        config.kafka.dead_letter_topic(),
    ));

    // === 4. Coordinator: health monitor, DLQ actor, background tasks ===
    let checks: Vec<Arc<dyn HealthCheck>> = vec![
        Arc::new(StoreHealthCheck::new(store.clone())),
        Arc::new(BrokerHealthCheck::new(producer.clone(), metrics.clone())),
    ];
    let mut coordinator = Coordinator::start(
        checks,
        HEALTH_CHECK_INTERVAL,
        dead_letter_sink,
        probe,
        metrics.clone(),
    );

    // === 5. Outbox relay ===
    let relay = OutboxRelay::new(
        store.clone(),
        producer.clone(),
        RelayConfig::from(&config.relay),
        metrics.clone(),
    );
    coordinator.spawn("outbox_relay", move |cancel| async move {
        relay.run(cancel).await;
    });

    // === 6. Consumer → kitchen tickets ===
    let consumer = RedpandaConsumer::new(&config.kafka)?;
    let context = WorkerContext {
        handler: Arc::new(KitchenEventHandler::new(store.clone())),
        dead_letters: coordinator.dead_letters(),
        committer: Arc::new(consumer.committer()),
        policy: HandlerPolicy::new(config.consumer.retry()),
        dead_letter_backoff: config.relay.backoff(),
        metrics: metrics.clone(),
    };
    let lane_capacity = config.consumer.lane_capacity;
    coordinator.spawn("consumer", move |cancel| async move {
        let dispatcher = PartitionDispatcher::new(context, cancel.clone(), lane_capacity);
        consumer.run(dispatcher, cancel).await;
    });

    // === 7. Ingestion ===
    let pricing = StaticPriceList::new(
        config.pricing.prices.clone(),
        config.pricing.default_price,
    );
    let handler = OrderCommandHandler::new(store.clone(), Arc::new(pricing)).with_metrics(metrics.clone());
    let service = OrderGrpcService::new(Arc::new(handler), config.ingestion.request_timeout());

    if config.ingestion.demo_order {
        tracing::info!("📝 Placing demo order");
        let request = CreateOrderRequest {
            user_id: 7,
            restaurant_id: 3,
            items: vec![OrderItemRequest {
                product_id: 101,
                quantity: 2,
            }],
            delivery_address: String::new(),
        };
        match service.create_order(tonic::Request::new(request)).await {
            Ok(response) => tracing::info!("✅ Demo order created: {}", response.get_ref().order_id),
            Err(status) => tracing::warn!(code = ?status.code(), "Demo order rejected: {}", status.message()),
        }
    }

    tracing::info!("⏳ Pipeline running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    coordinator.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("🎉 Shutdown complete");

    Ok(())
}
