//! # Topic Consumer Loop
//!
//! Pull-based consumption of the enriched-context topic with a small worker pool.
//! Each worker reads a batch under a visibility timeout, hands every message to
//! the orchestrator, and settles the delivery according to the handler outcome.
//!
//! Messages that fail schema validation never reach the orchestrator: they go
//! straight to the topic's dead-letter queue and the delivery is acked, since
//! retrying a malformed document can only fail the same way again.

use crate::dead_letter::DeadLetterRouter;
use crate::error::Result;
use crate::events::validate_value;
use crate::messaging::{Broker, QueueMessage};
use crate::orchestration::orchestrator::{HandlerOutcome, ReviewOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tuning for one consumer pool.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    /// How long a read hides messages from other workers. Must comfortably
    /// exceed the orchestrator's request deadline.
    pub visibility_timeout: Duration,
    /// Idle wait between polls when the topic is empty.
    pub poll_interval: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            batch_size: 10,
            visibility_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Worker pool consuming one topic into the review orchestrator.
pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    orchestrator: Arc<ReviewOrchestrator>,
    router: Arc<DeadLetterRouter>,
    topic: String,
    settings: ConsumerSettings,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        orchestrator: Arc<ReviewOrchestrator>,
        router: Arc<DeadLetterRouter>,
        topic: impl Into<String>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            broker,
            orchestrator,
            router,
            topic: topic.into(),
            settings,
        }
    }

    /// Spawn the worker pool. Workers exit after the shutdown signal flips to
    /// true and the in-flight batch has been settled.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.settings.worker_count.max(1))
            .map(|worker_id| {
                let consumer = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { consumer.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, topic = %self.topic, "Consumer worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.drain_batch().await {
                Ok(0) => {
                    // Idle: wait out the poll interval, waking early on shutdown.
                    let wait = tokio::time::sleep(self.settings.poll_interval);
                    tokio::select! {
                        _ = wait => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(processed) => {
                    debug!(worker_id, topic = %self.topic, processed, "Batch settled");
                }
                Err(e) => {
                    error!(worker_id, topic = %self.topic, error = %e, "Batch read failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
        info!(worker_id, topic = %self.topic, "Consumer worker stopped");
    }

    /// Read and settle one batch. Returns how many messages were delivered.
    pub async fn drain_batch(&self) -> Result<usize> {
        let batch = self
            .broker
            .read(
                &self.topic,
                self.settings.visibility_timeout,
                self.settings.batch_size,
            )
            .await?;

        let count = batch.len();
        for message in &batch {
            self.settle(message).await;
        }
        Ok(count)
    }

    /// Process one delivery and settle it with the broker. A delivery whose
    /// settlement fails is left unacked so the visibility timeout redelivers it.
    async fn settle(&self, message: &QueueMessage) {
        let envelope = match validate_value(&message.body) {
            Ok(envelope) => envelope,
            Err(schema_error) => {
                warn!(
                    msg_id = message.msg_id,
                    topic = %self.topic,
                    error = %schema_error,
                    "Message failed schema validation"
                );
                let rejected = self
                    .router
                    .reject_malformed(&self.topic, &message.body, &schema_error.to_string())
                    .await;
                match rejected {
                    Ok(()) => self.ack(message.msg_id).await,
                    Err(e) => {
                        error!(
                            msg_id = message.msg_id,
                            error = %e,
                            "Could not dead-letter malformed message, leaving for redelivery"
                        );
                    }
                }
                return;
            }
        };

        match self.orchestrator.handle(&self.topic, &envelope).await {
            Ok(HandlerOutcome::DeadLettered { .. }) => {
                // Keep the original body queryable in the archive next to the
                // dead-letter record.
                if let Err(e) = self.broker.archive(&self.topic, message.msg_id).await {
                    error!(msg_id = message.msg_id, error = %e, "Archive failed");
                }
            }
            Ok(_) => self.ack(message.msg_id).await,
            Err(e) => {
                error!(
                    msg_id = message.msg_id,
                    event_id = %envelope.event_id,
                    error = %e,
                    "Handler could not settle delivery, leaving for redelivery"
                );
            }
        }
    }

    async fn ack(&self, msg_id: i64) {
        if let Err(e) = self.broker.ack(&self.topic, msg_id).await {
            error!(msg_id, topic = %self.topic, error = %e, "Ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::dead_letter::RetryPolicy;
    use crate::events::{
        topics, ContextEnriched, ContextStatus, EventEnvelope, EventPayload, EventPublisher,
    };
    use crate::gateway::{
        AiProvider, Completion, HeuristicTokenizer, ProviderError, ReviewGateway, TokenBudget,
    };
    use crate::idempotency::IdempotencyGuard;
    use async_trait::async_trait;

    struct FixedProvider {
        reply: Option<String>,
    }

    #[async_trait]
    impl AiProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn model(&self) -> &str {
            "fixed"
        }
        fn is_ready(&self) -> bool {
            true
        }
        async fn complete(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> std::result::Result<Completion, ProviderError> {
            match &self.reply {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    tokens_used: None,
                }),
                None => Err(ProviderError::Unavailable("offline".to_string())),
            }
        }
    }

    async fn harness(
        reply: Option<String>,
        max_attempts: u32,
    ) -> (Arc<crate::messaging::InMemoryBroker>, EventConsumer) {
        let broker = Arc::new(crate::messaging::InMemoryBroker::new());
        for topic in [
            topics::CONTEXT_ENRICHED,
            topics::REVIEW_COMPLETED,
            &topics::dlq_for(topics::CONTEXT_ENRICHED),
        ] {
            broker.create_queue(topic).await.unwrap();
        }

        let gateway = Arc::new(ReviewGateway::new(
            vec![Arc::new(FixedProvider { reply })],
            Box::new(HeuristicTokenizer::new()),
            TokenBudget::default(),
            2,
            Duration::from_secs(1),
        ));
        let router = Arc::new(DeadLetterRouter::new(
            broker.clone() as Arc<dyn Broker>,
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        ));
        let orchestrator = Arc::new(ReviewOrchestrator::new(
            gateway,
            EventPublisher::new(broker.clone() as Arc<dyn Broker>),
            Arc::new(IdempotencyGuard::new()),
            router.clone(),
            Duration::from_secs(2),
        ));
        let consumer = EventConsumer::new(
            broker.clone() as Arc<dyn Broker>,
            orchestrator,
            router,
            topics::CONTEXT_ENRICHED,
            ConsumerSettings {
                worker_count: 1,
                batch_size: 10,
                visibility_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(10),
            },
        );
        (broker, consumer)
    }

    fn enriched_envelope() -> EventEnvelope {
        EventEnvelope::new(
            CorrelationId::generate(),
            EventPayload::ContextEnriched(ContextEnriched {
                context_id: "ctx-9".to_string(),
                repository_owner: "octo".to_string(),
                repository_name: "widgets".to_string(),
                pull_request_number: 12,
                title: "Use buffered writes".to_string(),
                diff: "diff --git a/src/io.rs b/src/io.rs\n@@ -1 +1 @@\n+write_all\n".to_string(),
                status: ContextStatus::Completed,
            }),
        )
    }

    #[tokio::test]
    async fn test_valid_event_produces_review_and_acks() {
        let (broker, consumer) = harness(Some("src/io.rs:4: flush is missing".to_string()), 5).await;
        let envelope = enriched_envelope();
        broker
            .publish(topics::CONTEXT_ENRICHED, &envelope.to_value().unwrap())
            .await
            .unwrap();

        assert_eq!(consumer.drain_batch().await.unwrap(), 1);

        assert_eq!(broker.queue_depth(topics::CONTEXT_ENRICHED).await.unwrap(), 0);
        let published = broker.snapshot(topics::REVIEW_COMPLETED);
        assert_eq!(published.len(), 1);
        let out = validate_value(&published[0]).unwrap();
        assert_eq!(out.correlation_id, envelope.correlation_id);
    }

    #[tokio::test]
    async fn test_malformed_message_goes_straight_to_dlq() {
        let (broker, consumer) = harness(Some("ok".to_string()), 5).await;
        broker
            .publish(
                topics::CONTEXT_ENRICHED,
                &serde_json::json!({"event_type": "context_enriched", "oops": true}),
            )
            .await
            .unwrap();

        consumer.drain_batch().await.unwrap();

        assert_eq!(broker.queue_depth(topics::CONTEXT_ENRICHED).await.unwrap(), 0);
        let dlq = broker.snapshot(&topics::dlq_for(topics::CONTEXT_ENRICHED));
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_event_is_archived_after_dead_letter() {
        // Offline provider and a single-attempt policy dead-letters immediately.
        let (broker, consumer) = harness(None, 1).await;
        let envelope = enriched_envelope();
        broker
            .publish(topics::CONTEXT_ENRICHED, &envelope.to_value().unwrap())
            .await
            .unwrap();

        consumer.drain_batch().await.unwrap();

        assert_eq!(broker.queue_depth(topics::CONTEXT_ENRICHED).await.unwrap(), 0);
        assert_eq!(broker.archived(topics::CONTEXT_ENRICHED).len(), 1);
        let dlq = broker.snapshot(&topics::dlq_for(topics::CONTEXT_ENRICHED));
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_pool_drains_topic_and_shuts_down() {
        let (broker, consumer) = harness(Some("src/io.rs:1: note".to_string()), 5).await;
        for _ in 0..3 {
            broker
                .publish(
                    topics::CONTEXT_ENRICHED,
                    &enriched_envelope().to_value().unwrap(),
                )
                .await
                .unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handles = Arc::new(consumer).start(rx);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(broker.queue_depth(topics::CONTEXT_ENRICHED).await.unwrap(), 0);
        assert_eq!(broker.snapshot(topics::REVIEW_COMPLETED).len(), 3);
    }
}
