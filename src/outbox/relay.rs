use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::OutboxEvent;
use crate::config::RelaySettings;
use crate::messaging::{EventPublisher, StreamError};
use crate::metrics::Metrics;
use crate::store::{OutboxStore, StoreError};
use crate::utils::{Backoff, RetryConfig};

// ============================================================================
// Outbox Relay - drains pending events to the stream
// ============================================================================
//
// Each pass:
// 1. Claim up to `batch_size` pending events, oldest first (exclusive claim)
// 2. Publish them one by one; stop at the first failure so a user's later
//    events never overtake an earlier one
// 3. Mark the acked events published, record the failure, commit the claim
//
// A crash between broker ack and commit republishes the acked events on the
// next pass. Consumers deduplicate by order id.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub backoff: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for RelayConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            poll_interval: settings.poll_interval(),
            backoff: settings.backoff(),
        }
    }
}

/// What one relay pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub published: usize,
    /// Event whose publish failed and stopped the pass
    pub failed: Option<i64>,
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
    metrics: Arc<Metrics>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics,
        }
    }

    /// Run one claim/publish/commit pass
    pub async fn drain_once(&self) -> Result<DrainReport, StoreError> {
        let timer = self.metrics.outbox_batch_duration.start_timer();
        let mut claim = self.store.claim_pending(self.config.batch_size).await?;
        let events = claim.events().to_vec();
        self.metrics.outbox_batch_size.set(events.len() as i64);

        if events.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut published = Vec::with_capacity(events.len());
        let mut failed = None;

        for event in &events {
            match self.publish(event).await {
                Ok(()) => published.push(event.id),
                Err(e) => {
                    self.metrics.outbox_publish_failures_total.inc();
                    tracing::warn!(
                        event_id = event.id,
                        order_id = event.order_id,
                        attempts = event.attempts + 1,
                        error = %e,
                        "Failed to publish outbox event, stopping batch"
                    );
                    claim.record_failure(event.id, &e.to_string()).await?;
                    failed = Some(event.id);
                    break;
                }
            }
        }

        claim.mark_published(&published).await?;
        claim.commit().await?;
        timer.observe_duration();

        self.metrics.outbox_published_total.inc_by(published.len() as u64);
        tracing::info!(
            claimed = events.len(),
            published = published.len(),
            "📤 Outbox batch relayed"
        );

        Ok(DrainReport {
            claimed: events.len(),
            published: published.len(),
            failed,
        })
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<(), StreamError> {
        let message = event.to_stream_message()?;
        self.publisher.publish(&message).await?;
        tracing::debug!(
            event_id = event.id,
            order_id = event.order_id,
            key = %message.key,
            "Outbox event acknowledged"
        );
        Ok(())
    }

    /// Drain until cancelled. Full batches are followed immediately by the
    /// next pass; idle passes wait `poll_interval`; failures back off.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "🔄 Outbox relay started"
        );

        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.drain_once() => outcome,
            };

            let delay = match outcome {
                Ok(report) if report.failed.is_none() => {
                    backoff.reset();
                    if report.claimed >= self.config.batch_size {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Ok(_) => backoff.next_delay(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        failures = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Outbox relay pass failed"
                    );
                    delay
                }
            };

            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}
