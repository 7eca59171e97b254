use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    DeadLetter, DeadLetterSink, EventHandler, HandlerError, InboundMessage, OffsetCommitter,
    StreamError,
};
use crate::metrics::Metrics;
use crate::utils::{Backoff, RetryConfig};

// ============================================================================
// Partition Dispatcher
// ============================================================================
//
// One worker task per (topic, partition). Messages of one partition are
// handled strictly one after another; partitions proceed independently.
//
// Per message:
//   handler Ok                      -> ack
//   transient, attempts remain      -> sleep, retry in place
//   permanent / attempts exhausted  -> park to DLQ, then ack
//   undecodable payload             -> park to DLQ, then ack
// "ack" commits offset + 1. A DLQ write that fails is retried until it
// succeeds or the worker is cancelled, blocking the partition meanwhile.
//
// ============================================================================

/// What to do with a message after one handler attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Ack,
    Retry { delay: Duration },
    Park { reason: String },
}

#[derive(Debug, Clone)]
pub struct HandlerPolicy {
    retry: RetryConfig,
}

impl HandlerPolicy {
    /// `retry.max_attempts` bounds the handler attempts per message
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    /// Decide after the `attempt`-th (1-based) handler call
    pub fn classify(&self, attempt: u32, result: &Result<(), HandlerError>) -> Delivery {
        match result {
            Ok(()) => Delivery::Ack,
            Err(HandlerError::Permanent(reason)) => Delivery::Park {
                reason: format!("permanent failure: {}", reason),
            },
            Err(HandlerError::Transient(reason)) if attempt >= self.max_attempts() => {
                Delivery::Park {
                    reason: format!("gave up after {} attempts: {}", attempt, reason),
                }
            }
            Err(HandlerError::Transient(_)) => Delivery::Retry {
                delay: self.retry.delay_for_attempt(attempt),
            },
        }
    }
}

/// Everything a partition worker needs, shared by all workers
pub struct WorkerContext {
    pub handler: Arc<dyn EventHandler>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub committer: Arc<dyn OffsetCommitter>,
    pub policy: HandlerPolicy,
    /// Backoff between failed dead-letter writes (attempt limit ignored)
    pub dead_letter_backoff: RetryConfig,
    pub metrics: Arc<Metrics>,
}

type PartitionKey = (String, i32);

pub struct PartitionDispatcher {
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
    lane_capacity: usize,
    lanes: HashMap<PartitionKey, mpsc::Sender<InboundMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl PartitionDispatcher {
    pub fn new(context: WorkerContext, cancel: CancellationToken, lane_capacity: usize) -> Self {
        Self {
            context: Arc::new(context),
            cancel,
            lane_capacity: lane_capacity.max(1),
            lanes: HashMap::new(),
            workers: Vec::new(),
        }
    }

    /// Hand a message to its partition's worker, starting the worker on first
    /// use. Waits while the worker's lane is full.
    pub async fn dispatch(&mut self, message: InboundMessage) -> Result<(), StreamError> {
        let key = (message.topic.clone(), message.partition);
        let sender = match self.lanes.get(&key) {
            Some(sender) => sender.clone(),
            None => self.start_worker(key),
        };

        sender
            .send(message)
            .await
            .map_err(|_| StreamError::Unavailable("partition worker stopped".to_string()))
    }

    pub fn partition_count(&self) -> usize {
        self.lanes.len()
    }

    /// Close every lane and wait for the workers to finish what they hold.
    /// Cancel the token first to abandon in-flight work instead.
    pub async fn shutdown(mut self) {
        self.lanes.clear();
        for result in join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Partition worker panicked");
            }
        }
    }

    fn start_worker(&mut self, key: PartitionKey) -> mpsc::Sender<InboundMessage> {
        let (tx, rx) = mpsc::channel(self.lane_capacity);
        let (topic, partition) = key.clone();

        tracing::info!(topic = %topic, partition = partition, "Starting partition worker");

        let worker = PartitionWorker {
            context: self.context.clone(),
            cancel: self.cancel.clone(),
            topic,
            partition,
        };
        self.workers.push(tokio::spawn(worker.run(rx)));
        self.lanes.insert(key, tx.clone());
        tx
    }
}

struct PartitionWorker {
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
    topic: String,
    partition: i32,
}

impl PartitionWorker {
    async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            if !self.process(&message).await {
                // cancelled mid-message: leave its offset uncommitted
                break;
            }
        }

        tracing::info!(
            topic = %self.topic,
            partition = self.partition,
            "Partition worker stopped"
        );
    }

    /// Returns false when cancelled before the message was settled
    async fn process(&self, message: &InboundMessage) -> bool {
        let (delivery, attempts) = match message.decode() {
            Ok(event) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let timer = self.context.metrics.handler_duration.start_timer();
                    let result = self.context.handler.handle(&event).await;
                    timer.observe_duration();

                    match self.context.policy.classify(attempt, &result) {
                        Delivery::Retry { delay } => {
                            self.context.metrics.consumer_retries_total.inc();
                            tracing::warn!(
                                order_id = event.order_id,
                                offset = message.offset,
                                attempt = attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = ?result.err(),
                                "Handler failed transiently, retrying"
                            );
                            if !self.pause(delay).await {
                                return false;
                            }
                        }
                        settled => break (settled, attempt),
                    }
                }
            }
            Err(e) => (
                Delivery::Park {
                    reason: format!("undecodable payload: {}", e),
                },
                0,
            ),
        };

        match delivery {
            Delivery::Park { reason } => {
                if !self.park(message, reason, attempts).await {
                    return false;
                }
                self.context.metrics.record_consumed("parked");
            }
            _ => self.context.metrics.record_consumed("acked"),
        }

        self.commit(message).await;
        true
    }

    async fn park(&self, message: &InboundMessage, reason: String, attempts: u32) -> bool {
        tracing::error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            attempts = attempts,
            reason = %reason,
            "💀 Parking message to dead letter queue"
        );

        let letter = DeadLetter::from_message(message, reason, attempts);
        let mut backoff = Backoff::new(self.context.dead_letter_backoff.clone());

        loop {
            match self.context.dead_letters.write(&letter).await {
                Ok(()) => return true,
                Err(e) => {
                    self.context.metrics.dlq_write_failures_total.inc();
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        offset = message.offset,
                        failures = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Dead letter write failed, partition blocked until it succeeds"
                    );
                    if !self.pause(delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn commit(&self, message: &InboundMessage) {
        let next_offset = message.offset + 1;
        if let Err(e) = self
            .context
            .committer
            .commit(&message.topic, message.partition, next_offset)
            .await
        {
            // a later commit on this partition covers this offset
            self.context.metrics.offset_commit_failures_total.inc();
            tracing::warn!(
                error = %e,
                topic = %message.topic,
                partition = message.partition,
                next_offset = next_offset,
                "Offset commit failed"
            );
        }
    }

    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderCreated;
    use crate::messaging::testing::{RecordingCommitter, RecordingDeadLetters, ScriptedHandler};
    use chrono::Utc;

    const TOPIC: &str = "user-order";

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn message(partition: i32, offset: i64, order_id: i64) -> InboundMessage {
        let event = OrderCreated {
            order_id,
            user_id: 7,
            timestamp: Utc::now(),
        };
        InboundMessage {
            topic: TOPIC.to_string(),
            partition,
            offset,
            key: Some(b"7".to_vec()),
            payload: Some(serde_json::to_vec(&event).unwrap()),
        }
    }

    struct Harness {
        handler: Arc<ScriptedHandler>,
        dead_letters: Arc<RecordingDeadLetters>,
        committer: Arc<RecordingCommitter>,
        metrics: Arc<Metrics>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                handler: Arc::new(ScriptedHandler::new()),
                dead_letters: Arc::new(RecordingDeadLetters::new()),
                committer: Arc::new(RecordingCommitter::new()),
                metrics: Arc::new(Metrics::new().unwrap()),
            }
        }

        fn dispatcher(&self, max_attempts: u32, cancel: CancellationToken) -> PartitionDispatcher {
            let context = WorkerContext {
                handler: self.handler.clone(),
                dead_letters: self.dead_letters.clone(),
                committer: self.committer.clone(),
                policy: HandlerPolicy::new(fast_retry(max_attempts)),
                dead_letter_backoff: fast_retry(u32::MAX),
                metrics: self.metrics.clone(),
            };
            PartitionDispatcher::new(context, cancel, 8)
        }
    }

    #[test]
    fn test_classify() {
        let policy = HandlerPolicy::new(fast_retry(3));

        assert_eq!(policy.classify(1, &Ok(())), Delivery::Ack);
        assert!(matches!(
            policy.classify(1, &Err(HandlerError::Transient("db".into()))),
            Delivery::Retry { .. }
        ));
        assert!(matches!(
            policy.classify(3, &Err(HandlerError::Transient("db".into()))),
            Delivery::Park { .. }
        ));
        assert!(matches!(
            policy.classify(1, &Err(HandlerError::Permanent("bad".into()))),
            Delivery::Park { .. }
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_retry_in_place_then_ack() {
        let harness = Harness::new();
        harness.handler.script(
            42,
            vec![
                Err(HandlerError::Transient("timeout".into())),
                Err(HandlerError::Transient("timeout".into())),
            ],
        );

        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());
        dispatcher.dispatch(message(0, 10, 42)).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(harness.handler.calls_for(42), 3);
        assert!(harness.dead_letters.letters().is_empty());
        assert_eq!(harness.committer.last_committed(TOPIC, 0), Some(11));
        assert_eq!(harness.metrics.consumer_retries_total.get(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_parks_immediately() {
        let harness = Harness::new();
        harness
            .handler
            .script(42, vec![Err(HandlerError::Permanent("unknown restaurant".into()))]);

        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());
        dispatcher.dispatch(message(0, 3, 42)).await.unwrap();
        dispatcher.dispatch(message(0, 4, 43)).await.unwrap();
        dispatcher.shutdown().await;

        let letters = harness.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].offset, 3);
        assert_eq!(letters[0].attempts, 1);
        assert_eq!(harness.handler.calls_for(42), 1);
        assert_eq!(harness.handler.calls_for(43), 1);
        assert_eq!(harness.committer.last_committed(TOPIC, 0), Some(5));
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_with_attempt_count() {
        let harness = Harness::new();
        harness
            .handler
            .script(42, vec![Err(HandlerError::Transient("down".into())); 5]);

        let mut dispatcher = harness.dispatcher(3, CancellationToken::new());
        dispatcher.dispatch(message(0, 0, 42)).await.unwrap();
        dispatcher.shutdown().await;

        let letters = harness.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(harness.handler.calls_for(42), 3);
        assert_eq!(harness.committer.last_committed(TOPIC, 0), Some(1));
    }

    #[tokio::test]
    async fn test_undecodable_payload_parked_without_handler_call() {
        let harness = Harness::new();
        let mut garbage = message(0, 7, 42);
        garbage.payload = Some(b"{not json".to_vec());

        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());
        dispatcher.dispatch(garbage).await.unwrap();
        dispatcher.shutdown().await;

        let letters = harness.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].reason.contains("undecodable"));
        assert_eq!(letters[0].payload.as_deref(), Some(&b"{not json"[..]));
        assert!(harness.handler.seen().is_empty());
        assert_eq!(harness.committer.last_committed(TOPIC, 0), Some(8));
    }

    #[tokio::test]
    async fn test_dead_letter_failures_block_until_written() {
        let harness = Harness::new();
        harness.dead_letters.fail_next(2);
        harness
            .handler
            .script(42, vec![Err(HandlerError::Permanent("bad".into()))]);

        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());
        dispatcher.dispatch(message(0, 0, 42)).await.unwrap();
        dispatcher.dispatch(message(0, 1, 43)).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(harness.dead_letters.letters().len(), 1);
        assert_eq!(harness.metrics.dlq_write_failures_total.get(), 2);
        assert_eq!(
            harness.committer.commits(),
            vec![(TOPIC.to_string(), 0, 1), (TOPIC.to_string(), 0, 2)]
        );
    }

    #[tokio::test]
    async fn test_partition_order_preserved() {
        let harness = Harness::new();
        harness
            .handler
            .script(2, vec![Err(HandlerError::Transient("slow".into()))]);

        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());
        for offset in 0..5 {
            dispatcher.dispatch(message(0, offset, offset + 1)).await.unwrap();
        }
        dispatcher.shutdown().await;

        let order_ids: Vec<i64> = harness.handler.seen().iter().map(|e| e.order_id).collect();
        assert_eq!(order_ids, vec![1, 2, 2, 3, 4, 5]);

        let offsets: Vec<i64> = harness.committer.commits().iter().map(|c| c.2).collect();
        assert_eq!(offsets, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_one_worker_per_partition() {
        let harness = Harness::new();
        let mut dispatcher = harness.dispatcher(5, CancellationToken::new());

        dispatcher.dispatch(message(0, 0, 1)).await.unwrap();
        dispatcher.dispatch(message(1, 0, 2)).await.unwrap();
        dispatcher.dispatch(message(0, 1, 3)).await.unwrap();
        assert_eq!(dispatcher.partition_count(), 2);
        dispatcher.shutdown().await;

        assert_eq!(harness.committer.last_committed(TOPIC, 0), Some(2));
        assert_eq!(harness.committer.last_committed(TOPIC, 1), Some(1));
    }

    #[tokio::test]
    async fn test_cancel_leaves_blocked_message_uncommitted() {
        let harness = Harness::new();
        harness.dead_letters.fail_next(u32::MAX);
        harness
            .handler
            .script(42, vec![Err(HandlerError::Permanent("bad".into()))]);

        let cancel = CancellationToken::new();
        let mut dispatcher = harness.dispatcher(5, cancel.clone());
        dispatcher.dispatch(message(0, 0, 42)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        dispatcher.shutdown().await;

        assert!(harness.committer.commits().is_empty());
        assert!(harness.dead_letters.letters().is_empty());
    }
}
