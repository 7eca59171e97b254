// ============================================================================
// In-process doubles for the messaging traits
// ============================================================================
//
// Used by unit tests and the end-to-end pipeline tests. Failures can be
// scripted so retry, park and redelivery paths run without a broker.
//
// ============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    DeadLetter, DeadLetterSink, EventHandler, EventPublisher, HandlerError, InboundMessage,
    OffsetCommitter, StreamError, StreamMessage,
};
use crate::domain::order::{OrderCreated, OrderId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acknowledges publishes in memory. Acked messages can be replayed to a
/// consumer as `InboundMessage`s, all on partition 0 in ack order.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<StreamMessage>>,
    calls: AtomicUsize,
    failing_calls: Mutex<HashSet<usize>>,
    down: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `call`-th publish (1-based, counted across all calls)
    pub fn fail_call(&self, call: usize) {
        lock(&self.failing_calls).insert(call);
    }

    /// While down every publish fails as if the broker were unreachable
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<StreamMessage> {
        lock(&self.published).clone()
    }

    pub fn as_inbound(&self, topic: &str) -> Vec<InboundMessage> {
        self.published()
            .into_iter()
            .enumerate()
            .map(|(offset, message)| InboundMessage {
                topic: topic.to_string(),
                partition: 0,
                offset: offset as i64,
                key: Some(message.key.into_bytes()),
                payload: Some(message.value.into_bytes()),
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: &StreamMessage) -> Result<(), StreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.down.load(Ordering::SeqCst) {
            return Err(StreamError::Unavailable("broker down".to_string()));
        }
        if lock(&self.failing_calls).remove(&call) {
            return Err(StreamError::Unavailable(format!("publish {} rejected", call)));
        }
        lock(&self.published).push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(String, i32, i64)>>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        lock(&self.commits).clone()
    }

    pub fn last_committed(&self, topic: &str, partition: i32) -> Option<i64> {
        lock(&self.commits)
            .iter()
            .rev()
            .find(|(t, p, _)| t == topic && *p == partition)
            .map(|(_, _, offset)| *offset)
    }
}

#[async_trait]
impl OffsetCommitter for RecordingCommitter {
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), StreamError> {
        lock(&self.commits).push((topic.to_string(), partition, next_offset));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
    failures_remaining: AtomicU32,
}

impl RecordingDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        lock(&self.letters).clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn write(&self, letter: &DeadLetter) -> Result<(), StreamError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StreamError::Unavailable("dead-letter topic unavailable".to_string()));
        }
        lock(&self.letters).push(letter.clone());
        Ok(())
    }
}

/// Handler returning scripted results per order, `Ok` once a script runs out.
#[derive(Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<OrderId, VecDeque<Result<(), HandlerError>>>>,
    seen: Mutex<Vec<OrderCreated>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, order_id: OrderId, results: Vec<Result<(), HandlerError>>) {
        lock(&self.scripts).insert(order_id, results.into());
    }

    /// Every invocation, in call order, including retries
    pub fn seen(&self) -> Vec<OrderCreated> {
        lock(&self.seen).clone()
    }

    pub fn calls_for(&self, order_id: OrderId) -> usize {
        lock(&self.seen)
            .iter()
            .filter(|event| event.order_id == order_id)
            .count()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
        lock(&self.seen).push(event.clone());
        lock(&self.scripts)
            .get_mut(&event.order_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}
