use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

use super::{KitchenTicketStore, OrderStore, OutboxClaim, OutboxStore, StoreError};
use crate::domain::kitchen::KitchenTicket;
use crate::domain::order::{NewOrder, Order, OrderCreated, OrderId};
use crate::outbox::{OutboxEvent, OutboxStatus};

// ============================================================================
// In-memory store
// ============================================================================
//
// Same contracts as the PostgreSQL store, kept in process. Clones share
// state. Faults can be injected to exercise rollback and redelivery paths.
//
// ============================================================================

#[derive(Default)]
struct State {
    last_order_id: OrderId,
    last_event_id: i64,
    orders: BTreeMap<OrderId, Order>,
    outbox: BTreeMap<i64, OutboxEvent>,
    tickets: BTreeMap<OrderId, KitchenTicket>,
}

#[derive(Default)]
struct Faults {
    fail_item_at: Mutex<Option<usize>>,
    fail_next_commit: AtomicBool,
    unavailable: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    // stands in for the relay's advisory lock
    claim_lock: Arc<tokio::sync::Mutex<()>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Fail `create` while writing the item at `index` (0-based)
    pub fn fail_item_insert_at(&self, index: Option<usize>) {
        *self
            .faults
            .fail_item_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = index;
    }

    /// Fail the next claim commit; its staged changes are discarded
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    pub fn item_count(&self) -> usize {
        self.state().orders.values().map(|order| order.items.len()).sum()
    }

    /// All outbox rows in id order
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state().outbox.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state()
            .outbox
            .values()
            .filter(|event| event.status == OutboxStatus::Pending)
            .count()
    }

    /// All kitchen tickets in order id order
    pub fn tickets(&self) -> Vec<KitchenTicket> {
        self.state().tickets.values().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, order: &NewOrder) -> Result<OrderId, StoreError> {
        self.check_available()?;

        // items are staged before anything becomes visible
        let fail_at = *self
            .faults
            .fail_item_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = fail_at.filter(|index| *index < order.items.len()) {
            return Err(StoreError::Injected(format!("item insert {} failed", index)));
        }

        let mut state = self.state();
        state.last_order_id += 1;
        state.last_event_id += 1;
        let order_id = state.last_order_id;
        let event_id = state.last_event_id;

        state.orders.insert(order_id, order.clone().into_order(order_id));
        state.outbox.insert(
            event_id,
            OutboxEvent {
                id: event_id,
                order_id,
                event_type: OrderCreated::EVENT_TYPE.to_string(),
                payload: order.created_event(order_id),
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                created_at: order.created_at,
                published_at: None,
            },
        );

        Ok(order_id)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Order, StoreError> {
        self.check_available()?;
        self.state()
            .orders
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxClaim>, StoreError> {
        self.check_available()?;

        let Ok(guard) = self.claim_lock.clone().try_lock_owned() else {
            return Ok(Box::new(MemoryClaim::empty(self.clone())));
        };

        let events = self
            .state()
            .outbox
            .values()
            .filter(|event| event.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect();

        Ok(Box::new(MemoryClaim {
            store: self.clone(),
            _guard: Some(guard),
            events,
            published: Vec::new(),
            failures: Vec::new(),
        }))
    }
}

/// Changes are staged and applied to the shared state only on commit
pub struct MemoryClaim {
    store: MemoryStore,
    _guard: Option<OwnedMutexGuard<()>>,
    events: Vec<OutboxEvent>,
    published: Vec<i64>,
    failures: Vec<(i64, String)>,
}

impl MemoryClaim {
    fn empty(store: MemoryStore) -> Self {
        Self {
            store,
            _guard: None,
            events: Vec::new(),
            published: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn owns(&self, id: i64) -> Result<(), StoreError> {
        if self.events.iter().any(|event| event.id == id) {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!("outbox event {} is not part of this claim", id)))
        }
    }
}

#[async_trait]
impl OutboxClaim for MemoryClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_published(&mut self, ids: &[i64]) -> Result<(), StoreError> {
        for id in ids {
            self.owns(*id)?;
        }
        self.published.extend_from_slice(ids);
        Ok(())
    }

    async fn record_failure(&mut self, id: i64, error: &str) -> Result<(), StoreError> {
        self.owns(id)?;
        self.failures.push((id, error.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.store.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Injected("claim commit failed".to_string()));
        }

        let now = Utc::now();
        let mut state = self.store.state();
        for id in &self.published {
            if let Some(event) = state.outbox.get_mut(id) {
                event.status = OutboxStatus::Published;
                event.published_at = Some(now);
            }
        }
        for (id, error) in &self.failures {
            if let Some(event) = state.outbox.get_mut(id) {
                event.attempts += 1;
                event.last_error = Some(error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KitchenTicketStore for MemoryStore {
    async fn upsert_ticket(&self, ticket: &KitchenTicket) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state();
        if state.tickets.contains_key(&ticket.order_id) {
            return Ok(false);
        }
        state.tickets.insert(ticket.order_id, ticket.clone());
        Ok(true)
    }

    async fn get_ticket(&self, order_id: OrderId) -> Result<Option<KitchenTicket>, StoreError> {
        self.check_available()?;
        Ok(self.state().tickets.get(&order_id).cloned())
    }
}
