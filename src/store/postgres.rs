use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Transaction};

use super::{KitchenTicketStore, OrderStore, OutboxClaim, OutboxStore, StoreError};
use crate::config::PostgresConfig;
use crate::domain::kitchen::KitchenTicket;
use crate::domain::order::{NewOrder, Order, OrderCreated, OrderId, OrderItem};
use crate::outbox::{OutboxEvent, OutboxStatus};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// PostgreSQL store (sqlx)
// ============================================================================

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Advisory lock key held by whichever relay currently drains the outbox
const RELAY_LOCK_KEY: i64 = 0x6f75_7462_6f78;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the pool, retrying while the database is still coming up
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to PostgreSQL..."
        );

        let options = config.connect_options()?;
        let max_connections = config.max_connections;
        let min_connections = config.min_connections;
        let max_lifetime = config.max_lifetime();
        let acquire_timeout = config.acquire_timeout();

        let result = retry_on_transient(RetryConfig::aggressive(), |attempt| {
            let options = options.clone();
            async move {
                tracing::debug!(attempt = attempt, "Opening PostgreSQL pool");
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(min_connections)
                    .max_lifetime(max_lifetime)
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(StoreError::from)
            }
        })
        .await;

        match result {
            RetryResult::Success(pool) => Ok(Self::new(pool)),
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => Err(e),
        }
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("✅ Schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    restaurant_id: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    product_id: i64,
    quantity: i32,
    price: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> Result<Order, StoreError> {
        let status = self.status.parse().map_err(StoreError::Corrupt)?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            restaurant_id: self.restaurant_id,
            items: items
                .into_iter()
                .map(|row| OrderItem {
                    product_id: row.product_id,
                    quantity: row.quantity,
                    price: row.price,
                })
                .collect(),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    order_id: i64,
    event_type: String,
    payload: Json<OrderCreated>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEvent {
            id: row.id,
            order_id: row.order_id,
            event_type: row.event_type,
            payload: row.payload.0,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct KitchenTicketRow {
    order_id: i64,
    user_id: i64,
    status: String,
    received_at: DateTime<Utc>,
}

impl TryFrom<KitchenTicketRow> for KitchenTicket {
    type Error = StoreError;

    fn try_from(row: KitchenTicketRow) -> Result<Self, Self::Error> {
        Ok(KitchenTicket {
            order_id: row.order_id,
            user_id: row.user_id,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            received_at: row.received_at,
        })
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create(&self, order: &NewOrder) -> Result<OrderId, StoreError> {
        // any early return drops `tx`, which rolls everything back
        let mut tx = self.pool.begin().await?;

        let order_id: OrderId = sqlx::query_scalar(
            "INSERT INTO orders (user_id, restaurant_id, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(order.user_id)
        .bind(order.restaurant_id)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = QueryBuilder::<Postgres>::new(
            "INSERT INTO order_items (order_id, position, product_id, quantity, price) ",
        );
        items.push_values(order.items.iter().enumerate(), |mut row, (position, item)| {
            row.push_bind(order_id)
                .push_bind(position as i32)
                .push_bind(item.product_id)
                .push_bind(item.quantity)
                .push_bind(item.price);
        });
        items.build().execute(&mut *tx).await?;

        sqlx::query(
            "INSERT INTO outbox_events (order_id, event_type, payload, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(order_id)
        .bind(OrderCreated::EVENT_TYPE)
        .bind(Json(order.created_event(order_id)))
        .bind(OutboxStatus::Pending.as_str())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order_id)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let header: OrderRow = sqlx::query_as(
            "SELECT id, user_id, restaurant_id, status, created_at, updated_at
             FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let items: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT product_id, quantity, price
             FROM order_items WHERE order_id = $1
             ORDER BY position",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        header.into_order(items)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxClaim>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(RELAY_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;
        if !locked {
            tracing::debug!("Another relay holds the outbox lock");
            return Ok(Box::new(PgClaim { tx, events: Vec::new() }));
        }

        let rows: Vec<OutboxRow> = sqlx::query_as(
            "SELECT id, order_id, event_type, payload, status, attempts, last_error,
                    created_at, published_at
             FROM outbox_events
             WHERE status = 'pending'
             ORDER BY id
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let events = rows
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(PgClaim { tx, events }))
    }
}

/// Claimed rows stay locked until the transaction commits or is dropped
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

#[async_trait]
impl OutboxClaim for PgClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_published(&mut self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE outbox_events
             SET status = 'published', published_at = now()
             WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn record_failure(&mut self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_events
             SET attempts = attempts + 1, last_error = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl KitchenTicketStore for PgStore {
    async fn upsert_ticket(&self, ticket: &KitchenTicket) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO kitchen_tickets (order_id, user_id, status, received_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(ticket.order_id)
        .bind(ticket.user_id)
        .bind(ticket.status.as_str())
        .bind(ticket.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_ticket(&self, order_id: OrderId) -> Result<Option<KitchenTicket>, StoreError> {
        let row: Option<KitchenTicketRow> = sqlx::query_as(
            "SELECT order_id, user_id, status, received_at
             FROM kitchen_tickets WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(KitchenTicket::try_from).transpose()
    }
}
