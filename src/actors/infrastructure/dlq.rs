use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use std::collections::HashMap;
use std::sync::Arc;

use crate::messaging::{DeadLetter, DeadLetterSink, StreamError};
use crate::metrics::Metrics;

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Serializes writes of parked consumer messages to the dead-letter topic and
// keeps counters for manual intervention. A write failure is returned to the
// caller, which keeps its partition blocked and retries.
//
// ============================================================================

pub struct DlqActor {
    sink: Arc<dyn DeadLetterSink>,
    metrics: Arc<Metrics>,
    stats: DlqStats,
}

impl DlqActor {
    pub fn new(sink: Arc<dyn DeadLetterSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            sink,
            metrics,
            stats: DlqStats::default(),
        }
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("DlqActor started - Dead Letter Queue ready");
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParkMessage(pub DeadLetter);

#[derive(Debug)]
pub struct GetDlqStats;

#[derive(Debug, Clone, Default)]
pub struct DlqStats {
    pub total_messages: u64,
    pub by_source_topic: HashMap<String, u64>,
    pub last_parked_at: Option<DateTime<Utc>>,
}

impl Reply for DlqStats {
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
// Handlers
// ============================================================================

impl Message<ParkMessage> for DlqActor {
    type Reply = Result<(), StreamError>;

    async fn handle(&mut self, msg: ParkMessage, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let letter = msg.0;
        self.sink.write(&letter).await?;

        self.stats.total_messages += 1;
        *self
            .stats
            .by_source_topic
            .entry(letter.source_topic.clone())
            .or_default() += 1;
        self.stats.last_parked_at = Some(letter.parked_at);
        self.metrics.dlq_messages_total.inc();

        tracing::info!(
            topic = %letter.source_topic,
            partition = letter.partition,
            offset = letter.offset,
            "Message stored in DLQ"
        );
        Ok(())
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = DlqStats;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.stats.clone()
    }
}

// ============================================================================
// Sink facade used by the partition workers
// ============================================================================

#[derive(Clone)]
pub struct DlqClient {
    actor: ActorRef<DlqActor>,
}

impl DlqClient {
    pub fn new(actor: ActorRef<DlqActor>) -> Self {
        Self { actor }
    }
}

#[async_trait]
impl DeadLetterSink for DlqClient {
    async fn write(&self, letter: &DeadLetter) -> Result<(), StreamError> {
        self.actor
            .ask(ParkMessage(letter.clone()))
            .await
            .map_err(|err| match err {
                SendError::HandlerError(e) => e,
                other => StreamError::Unavailable(format!("DLQ actor unavailable: {:?}", other)),
            })
    }
}
