//! # Review Orchestrator
//!
//! Consumes enriched context events and drives one review per occurrence through
//! the gateway: duplicate suppression, request planning, generation with a
//! request-level deadline, result publication, and failure routing.
//!
//! Processing is effectively-once per event id. The duplicate guard is taken
//! before any side effect; a failed attempt releases its claim so the scheduled
//! redelivery is processed instead of being swallowed as a duplicate.

use crate::dead_letter::{DeadLetterRouter, FailureKind, RouteOutcome};
use crate::error::Result;
use crate::events::{
    topics, ContextEnriched, ContextStatus, EventEnvelope, EventPayload, EventPublisher,
    ReviewCompleted, ReviewFailed, ReviewRequestMetadata,
};
use crate::gateway::{GatewayError, ReviewGateway};
use crate::idempotency::{Freshness, IdempotencyGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// What the consumer should do with the delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Review produced and published. Ack the delivery.
    Completed,
    /// Nothing to do for this delivery (duplicate, non-triggering context). Ack.
    Skipped { reason: String },
    /// Transient failure; a copy was re-published with a delay. Ack the original.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Terminal failure; the event moved to the dead-letter queue. Archive the
    /// original for the audit trail.
    DeadLettered { attempt_count: u32 },
}

pub struct ReviewOrchestrator {
    gateway: Arc<ReviewGateway>,
    publisher: EventPublisher,
    guard: Arc<IdempotencyGuard>,
    router: Arc<DeadLetterRouter>,
    /// Deadline over the whole generation, chunk retries included.
    request_timeout: Duration,
}

impl ReviewOrchestrator {
    pub fn new(
        gateway: Arc<ReviewGateway>,
        publisher: EventPublisher,
        guard: Arc<IdempotencyGuard>,
        router: Arc<DeadLetterRouter>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            publisher,
            guard,
            router,
            request_timeout,
        }
    }

    /// Handle one delivery from `source_topic`.
    ///
    /// Errors are reserved for broker trouble while routing the failure itself;
    /// the caller should leave the message unacked so it redelivers.
    pub async fn handle(
        &self,
        source_topic: &str,
        envelope: &EventEnvelope,
    ) -> Result<HandlerOutcome> {
        let span = envelope.correlation_id.span();
        self.handle_inner(source_topic, envelope)
            .instrument(span)
            .await
    }

    async fn handle_inner(
        &self,
        source_topic: &str,
        envelope: &EventEnvelope,
    ) -> Result<HandlerOutcome> {
        let key = envelope.idempotency_key();
        if self.guard.check_and_mark(&key) == Freshness::Duplicate {
            debug!(
                event_id = %envelope.event_id,
                idempotency_key = %key,
                "Duplicate delivery suppressed"
            );
            return Ok(HandlerOutcome::Skipped {
                reason: "duplicate delivery".to_string(),
            });
        }

        let EventPayload::ContextEnriched(context) = &envelope.payload else {
            // Wrong event type on this topic is a contract violation and will
            // repeat identically on redelivery.
            return self
                .fail(
                    source_topic,
                    envelope,
                    None,
                    FailureKind::Permanent,
                    &format!("unexpected event type {} on {source_topic}", envelope.event_type),
                )
                .await;
        };

        if context.status != ContextStatus::Completed {
            self.guard.mark_processed(&key);
            info!(
                event_id = %envelope.event_id,
                context_id = %context.context_id,
                "Context collection failed upstream, no review to run"
            );
            return Ok(HandlerOutcome::Skipped {
                reason: "context collection failed".to_string(),
            });
        }

        if context.diff.trim().is_empty() {
            self.guard.mark_processed(&key);
            debug!(
                event_id = %envelope.event_id,
                context_id = %context.context_id,
                "Empty diff, nothing to review"
            );
            return Ok(HandlerOutcome::Skipped {
                reason: "empty diff".to_string(),
            });
        }

        // Chunks are rebuilt from the event on every attempt so a retried
        // delivery never observes partial state from an earlier one.
        let request = match self.gateway.build_request(
            envelope.correlation_id,
            &context.diff,
            ReviewRequestMetadata {
                repository_owner: context.repository_owner.clone(),
                repository_name: context.repository_name.clone(),
                pull_request_number: context.pull_request_number,
                title: context.title.clone(),
            },
        ) {
            Ok(request) => request,
            Err(error) => {
                let message = error.to_string();
                return self
                    .fail(
                        source_topic,
                        envelope,
                        Some(context),
                        classify_gateway_error(&error),
                        &message,
                    )
                    .await;
            }
        };

        let generation = tokio::time::timeout(
            self.request_timeout,
            self.gateway.generate_review(&request),
        )
        .await;

        match generation {
            Ok(Ok(result)) => {
                let review = ReviewCompleted {
                    review_id: Uuid::new_v4().to_string(),
                    context_id: context.context_id.clone(),
                    repository_owner: context.repository_owner.clone(),
                    repository_name: context.repository_name.clone(),
                    pull_request_number: context.pull_request_number,
                    comments: result.comments,
                    provider_used: result.provider_used,
                    token_usage: result.token_usage,
                    failed_chunks: result.failed_chunks,
                };
                let out = EventEnvelope::new(
                    envelope.correlation_id,
                    EventPayload::ReviewCompleted(review),
                );
                if let Err(error) = self.publisher.publish(topics::REVIEW_COMPLETED, &out).await {
                    // The review never reached the broker. Give the claim back
                    // so the redelivery is regenerated, not swallowed as a
                    // duplicate with zero published side effects.
                    self.guard.release(&key);
                    return Err(error.into());
                }

                self.guard.mark_processed(&key);
                self.router.on_success(envelope.event_id);

                info!(
                    event_id = %envelope.event_id,
                    context_id = %context.context_id,
                    review_event_id = %out.event_id,
                    "Review completed and published"
                );
                Ok(HandlerOutcome::Completed)
            }
            Ok(Err(error)) => {
                let message = error.to_string();
                self.fail(
                    source_topic,
                    envelope,
                    Some(context),
                    classify_gateway_error(&error),
                    &message,
                )
                .await
            }
            Err(_) => {
                let message = format!(
                    "review generation exceeded the {:?} request deadline",
                    self.request_timeout
                );
                self.fail(
                    source_topic,
                    envelope,
                    Some(context),
                    FailureKind::Transient,
                    &message,
                )
                .await
            }
        }
    }

    /// Route a handler failure. Releases the duplicate claim first so the
    /// scheduled redelivery is not suppressed, then emits a terminal
    /// `ReviewFailed` event if the router gave up on the occurrence.
    async fn fail(
        &self,
        source_topic: &str,
        envelope: &EventEnvelope,
        context: Option<&ContextEnriched>,
        kind: FailureKind,
        message: &str,
    ) -> Result<HandlerOutcome> {
        self.guard.release(&envelope.idempotency_key());

        let outcome = self
            .router
            .on_failure(source_topic, envelope, kind, message)
            .await?;

        match outcome {
            RouteOutcome::RetryScheduled { attempt, delay } => {
                Ok(HandlerOutcome::RetryScheduled { attempt, delay })
            }
            RouteOutcome::DeadLettered { attempt_count } => {
                if let Some(context) = context {
                    self.publish_review_failed(envelope, context, message).await;
                }
                Ok(HandlerOutcome::DeadLettered { attempt_count })
            }
        }
    }

    /// Terminal failures still produce an outbound event so the integration
    /// service can surface them on the pull request. Publishing it is best
    /// effort; the dead-letter record is the durable trail.
    async fn publish_review_failed(
        &self,
        envelope: &EventEnvelope,
        context: &ContextEnriched,
        message: &str,
    ) {
        let failed = ReviewFailed {
            review_id: Uuid::new_v4().to_string(),
            context_id: context.context_id.clone(),
            repository_owner: context.repository_owner.clone(),
            repository_name: context.repository_name.clone(),
            pull_request_number: context.pull_request_number,
            error_message: message.to_string(),
        };
        let out = EventEnvelope::new(envelope.correlation_id, EventPayload::ReviewFailed(failed));
        if let Err(error) = self.publisher.publish(topics::REVIEW_COMPLETED, &out).await {
            warn!(
                event_id = %envelope.event_id,
                error = %error,
                "Could not publish terminal review failure event"
            );
        }
    }
}

/// Gateway errors split on whether a redelivery could plausibly succeed.
fn classify_gateway_error(error: &GatewayError) -> FailureKind {
    match error {
        // Providers come back; exhaustion and unavailability are worth retrying.
        GatewayError::ProviderUnavailable(_) | GatewayError::AllProvidersExhausted { .. } => {
            FailureKind::Transient
        }
        // The diff will not shrink on redelivery.
        GatewayError::TokenBudgetExceeded(_) => FailureKind::Permanent,
    }
}

impl std::fmt::Debug for ReviewOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewOrchestrator")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::dead_letter::RetryPolicy;
    use crate::gateway::{
        AiProvider, Completion, HeuristicTokenizer, ProviderError, TokenBudget,
    };
    use crate::messaging::{
        Broker, InMemoryBroker, MessagingError, MessagingResult, QueueMessage,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SteadyProvider;

    #[async_trait]
    impl AiProvider for SteadyProvider {
        fn name(&self) -> &str {
            "steady"
        }
        fn model(&self) -> &str {
            "steady"
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
            Ok(Completion {
                text: "src/io.rs:3: consider flushing before close".to_string(),
                tokens_used: None,
            })
        }
    }

    /// Delegates to an in-memory broker but fails the first `failures_left`
    /// publishes to `fail_queue`.
    struct FlakyBroker {
        inner: Arc<InMemoryBroker>,
        fail_queue: String,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
            self.inner.create_queue(queue_name).await
        }

        async fn publish(&self, queue_name: &str, body: &Value) -> MessagingResult<i64> {
            if queue_name == self.fail_queue && self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(MessagingError::queue_operation(
                    queue_name,
                    "publish",
                    "broker unavailable",
                ));
            }
            self.inner.publish(queue_name, body).await
        }

        async fn publish_delayed(
            &self,
            queue_name: &str,
            body: &Value,
            delay: Duration,
        ) -> MessagingResult<i64> {
            self.inner.publish_delayed(queue_name, body, delay).await
        }

        async fn read(
            &self,
            queue_name: &str,
            visibility_timeout: Duration,
            limit: usize,
        ) -> MessagingResult<Vec<QueueMessage>> {
            self.inner.read(queue_name, visibility_timeout, limit).await
        }

        async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
            self.inner.ack(queue_name, msg_id).await
        }

        async fn archive(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
            self.inner.archive(queue_name, msg_id).await
        }

        async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64> {
            self.inner.queue_depth(queue_name).await
        }
    }

    fn orchestrator_over(broker: Arc<dyn Broker>) -> ReviewOrchestrator {
        let gateway = Arc::new(ReviewGateway::new(
            vec![Arc::new(SteadyProvider)],
            Box::new(HeuristicTokenizer::new()),
            TokenBudget::default(),
            2,
            Duration::from_secs(1),
        ));
        let router = Arc::new(DeadLetterRouter::new(
            Arc::clone(&broker),
            RetryPolicy::default(),
        ));
        ReviewOrchestrator::new(
            gateway,
            EventPublisher::new(broker),
            Arc::new(IdempotencyGuard::new()),
            router,
            Duration::from_secs(2),
        )
    }

    fn enriched_envelope() -> EventEnvelope {
        EventEnvelope::new(
            CorrelationId::generate(),
            EventPayload::ContextEnriched(ContextEnriched {
                context_id: "ctx-31".to_string(),
                repository_owner: "octo".to_string(),
                repository_name: "widgets".to_string(),
                pull_request_number: 8,
                title: "Flush on close".to_string(),
                diff: "diff --git a/src/io.rs b/src/io.rs\n@@ -1 +1 @@\n+close\n".to_string(),
                status: ContextStatus::Completed,
            }),
        )
    }

    #[tokio::test]
    async fn test_failed_result_publish_releases_claim_for_redelivery() {
        let inner = Arc::new(InMemoryBroker::new());
        for topic in [topics::CONTEXT_ENRICHED, topics::REVIEW_COMPLETED] {
            inner.create_queue(topic).await.unwrap();
        }
        let broker = Arc::new(FlakyBroker {
            inner: Arc::clone(&inner),
            fail_queue: topics::REVIEW_COMPLETED.to_string(),
            failures_left: AtomicU32::new(1),
        });
        let orchestrator = orchestrator_over(broker);
        let envelope = enriched_envelope();

        // The review generates but its publication fails, so the handler
        // surfaces an error and the delivery stays unacked.
        orchestrator
            .handle(topics::CONTEXT_ENRICHED, &envelope)
            .await
            .unwrap_err();
        assert_eq!(inner.snapshot(topics::REVIEW_COMPLETED).len(), 0);

        // The same envelope comes back after the visibility timeout. It must
        // be processed fresh, not suppressed as a duplicate.
        let outcome = orchestrator
            .handle(topics::CONTEXT_ENRICHED, &envelope)
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Completed);
        assert_eq!(inner.snapshot(topics::REVIEW_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_after_success_is_skipped() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        for topic in [topics::CONTEXT_ENRICHED, topics::REVIEW_COMPLETED] {
            broker.create_queue(topic).await.unwrap();
        }
        let orchestrator = orchestrator_over(Arc::clone(&broker));
        let envelope = enriched_envelope();

        let first = orchestrator
            .handle(topics::CONTEXT_ENRICHED, &envelope)
            .await
            .unwrap();
        assert_eq!(first, HandlerOutcome::Completed);

        let second = orchestrator
            .handle(topics::CONTEXT_ENRICHED, &envelope)
            .await
            .unwrap();
        assert!(matches!(second, HandlerOutcome::Skipped { .. }));
        assert_eq!(broker.queue_depth(topics::REVIEW_COMPLETED).await.unwrap(), 1);
    }
}
