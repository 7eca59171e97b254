//! PostgreSQL store tests using testcontainers.
//!
//! Run with: cargo test --test store_postgres --features postgres-tests
//!
//! Each test starts its own PostgreSQL container, applies the schema and
//! exercises the real SQL behind the store traits.

use std::time::Duration;

use chrono::Utc;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use order_pipeline::config::PostgresConfig;
use order_pipeline::domain::kitchen::{KitchenStatus, KitchenTicket};
use order_pipeline::domain::order::{NewOrder, OrderCreated, OrderItem, OrderStatus};
use order_pipeline::outbox::OutboxStatus;
use order_pipeline::store::{KitchenTicketStore, OrderStore, OutboxStore, PgStore, StoreError};
use order_pipeline::utils::IsTransient;

// reserved URL characters: the pool must not depend on URL encoding
const PASSWORD: &str = "p@ss/w#rd?";

async fn start_store() -> (ContainerAsync<GenericImage>, PgStore) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "orders")
        .with_env_var("POSTGRES_PASSWORD", PASSWORD)
        .with_env_var("POSTGRES_DB", "delivery")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    // the ready message is printed once during init and again when serving
    tokio::time::sleep(Duration::from_secs(1)).await;

    let config = PostgresConfig {
        host: container.get_host().await.expect("container host").to_string(),
        port: container
            .get_host_port_ipv4(5432)
            .await
            .expect("mapped port"),
        database: "delivery".to_string(),
        user: "orders".to_string(),
        password: PASSWORD.to_string(),
        max_connections: 5,
        min_connections: 1,
        ..PostgresConfig::default()
    };

    let store = PgStore::connect(&config).await.expect("Failed to connect to PostgreSQL");
    store.ensure_schema().await.expect("Failed to apply schema");
    // applying twice must be harmless
    store.ensure_schema().await.expect("Schema is not idempotent");

    (container, store)
}

async fn count(store: &PgStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .expect("count query")
}

fn item(product_id: i64, quantity: i32, price: i64) -> OrderItem {
    OrderItem {
        product_id,
        quantity,
        price,
    }
}

fn order(user_id: i64, items: Vec<OrderItem>) -> NewOrder {
    NewOrder::new(user_id, 3, items, Utc::now()).expect("valid order")
}

#[tokio::test]
async fn test_create_then_get_preserves_items_and_stages_event() {
    let (_container, store) = start_store().await;

    let id = store
        .create(&order(7, vec![item(102, 1, 120), item(101, 2, 450), item(103, 5, 0)]))
        .await
        .unwrap();
    assert!(id > 0);

    let found = store.get_by_id(id).await.unwrap();
    assert_eq!(found.user_id, 7);
    assert_eq!(found.status, OrderStatus::Created);
    assert_eq!(
        found.items,
        vec![item(102, 1, 120), item(101, 2, 450), item(103, 5, 0)]
    );

    assert_eq!(count(&store, "order_items").await, 3);
    let mut claim = store.claim_pending(10).await.unwrap();
    let events = claim.events().to_vec();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].order_id, id);
    assert_eq!(events[0].event_type, OrderCreated::EVENT_TYPE);
    assert_eq!(events[0].payload.user_id, 7);
    assert_eq!(events[0].status, OutboxStatus::Pending);
    claim.mark_published(&[]).await.unwrap();
    claim.commit().await.unwrap();

    let missing = store.get_by_id(id + 1000).await.unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_item_failure_after_header_insert_rolls_back_everything() {
    let (_container, store) = start_store().await;

    // bypasses NewOrder::new so the header insert succeeds and the item
    // batch trips the quantity CHECK
    let now = Utc::now();
    let broken = NewOrder {
        user_id: 7,
        restaurant_id: 3,
        items: vec![item(101, 2, 450), item(102, 0, 120)],
        status: OrderStatus::Created,
        created_at: now,
        updated_at: now,
    };

    let err = store.create(&broken).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    assert!(!err.is_transient());

    assert_eq!(count(&store, "orders").await, 0);
    assert_eq!(count(&store, "order_items").await, 0);
    assert_eq!(count(&store, "outbox_events").await, 0);

    store.create(&order(7, vec![item(101, 2, 450)])).await.unwrap();
    assert_eq!(count(&store, "orders").await, 1);
    assert_eq!(count(&store, "outbox_events").await, 1);
}

#[tokio::test]
async fn test_claim_is_single_writer_and_commits_marks() {
    let (_container, store) = start_store().await;
    let first = store.create(&order(7, vec![item(101, 1, 450)])).await.unwrap();
    let second = store.create(&order(7, vec![item(102, 1, 120)])).await.unwrap();

    let mut claim = store.claim_pending(10).await.unwrap();
    let claimed: Vec<i64> = claim.events().iter().map(|e| e.order_id).collect();
    assert_eq!(claimed, vec![first, second]);

    // a second relay while the first holds the lock sees nothing
    let concurrent = store.claim_pending(10).await.unwrap();
    assert!(concurrent.events().is_empty());
    concurrent.commit().await.unwrap();

    let first_event = claim.events()[0].id;
    let second_event = claim.events()[1].id;
    claim.mark_published(&[first_event]).await.unwrap();
    claim.record_failure(second_event, "broker down").await.unwrap();
    claim.commit().await.unwrap();

    let claim = store.claim_pending(10).await.unwrap();
    let remaining = claim.events().to_vec();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second_event);
    assert_eq!(remaining[0].attempts, 1);
    assert_eq!(remaining[0].last_error.as_deref(), Some("broker down"));
    drop(claim);

    let published: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE status = 'published' AND published_at IS NOT NULL",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(published, 1);
}

#[tokio::test]
async fn test_dropped_claim_leaves_events_pending() {
    let (_container, store) = start_store().await;
    store.create(&order(7, vec![item(101, 1, 450)])).await.unwrap();

    let mut claim = store.claim_pending(10).await.unwrap();
    let id = claim.events()[0].id;
    claim.mark_published(&[id]).await.unwrap();
    drop(claim);

    // the rollback reaches the server when the pool next touches that
    // connection; until then the advisory lock may still be held
    let events = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let claim = store.claim_pending(10).await.unwrap();
            if !claim.events().is_empty() {
                return claim.events().to_vec();
            }
            drop(claim);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("dropped claim never released the outbox");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, id);
    assert_eq!(events[0].status, OutboxStatus::Pending);
}

#[tokio::test]
async fn test_duplicate_ticket_upsert_is_noop() {
    let (_container, store) = start_store().await;
    let ticket = KitchenTicket {
        order_id: 42,
        user_id: 7,
        status: KitchenStatus::Accepted,
        received_at: Utc::now(),
    };

    assert!(store.upsert_ticket(&ticket).await.unwrap());
    assert!(!store.upsert_ticket(&ticket).await.unwrap());
    assert_eq!(count(&store, "kitchen_tickets").await, 1);

    let stored = store.get_ticket(42).await.unwrap().unwrap();
    assert_eq!(stored.user_id, 7);
    assert_eq!(stored.status, KitchenStatus::Accepted);
    assert!(store.get_ticket(43).await.unwrap().is_none());
}
