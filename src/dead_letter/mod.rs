//! # Dead-Letter Router
//!
//! Decides retry versus terminal failure for every handler error. Transient
//! failures are re-published to the source topic with an exponential-backoff delay
//! (jittered so a burst of failures does not redeliver as a thundering herd);
//! permanent failures and exhausted retries are published verbatim plus failure
//! metadata to the topic's dead-letter queue, and the original delivery is
//! acknowledged so it stops blocking the partition.
//!
//! The router only understands the transient/permanent split. What counts as
//! transient is a predicate each consumer supplies.

pub mod retry_policy;

pub use retry_policy::RetryPolicy;

use crate::events::{topics, EventEnvelope};
use crate::messaging::{Broker, MessagingResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Transient/permanent split the router operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed on redelivery: network timeouts, provider rate limits, broker
    /// unavailability.
    Transient,
    /// Will fail identically on redelivery: schema violations, malformed payloads.
    Permanent,
}

/// Pluggable classification predicate supplied by each consumer.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &(dyn std::error::Error + 'static)) -> FailureKind;
}

impl<F> FailureClassifier for F
where
    F: Fn(&(dyn std::error::Error + 'static)) -> FailureKind + Send + Sync,
{
    fn classify(&self, error: &(dyn std::error::Error + 'static)) -> FailureKind {
        self(error)
    }
}

/// Delivery lifecycle for one event while the router is tracking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Received,
    Processing,
    Acked,
    RetryScheduled,
    DeadLettered,
}

/// Retry bookkeeping for one failing event. Created on first failure, destroyed on
/// success or dead-lettering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub event_id: Uuid,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub next_eligible_at: DateTime<Utc>,
}

/// What the router decided for a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Redelivery scheduled after the embedded backoff delay.
    RetryScheduled {
        attempt: u32,
        delay: std::time::Duration,
    },
    /// Moved to the dead-letter queue; the original delivery must be acked.
    DeadLettered { attempt_count: u32 },
}

/// Failure context published alongside the dead-lettered event, enough for an
/// operator to trace and manually replay it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMetadata {
    pub source_topic: String,
    pub attempt_count: u32,
    pub last_error: String,
    pub correlation_id: String,
    pub failed_at: DateTime<Utc>,
}

/// Wire document written to `<topic>.dlq`: the event verbatim plus failure metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event: serde_json::Value,
    pub failure: FailureMetadata,
}

/// Routes handler failures to retry or dead-letter destinations.
pub struct DeadLetterRouter {
    broker: Arc<dyn Broker>,
    policy: RetryPolicy,
    attempts: DashMap<Uuid, DeliveryAttempt>,
}

impl DeadLetterRouter {
    pub fn new(broker: Arc<dyn Broker>, policy: RetryPolicy) -> Self {
        Self {
            broker,
            policy,
            attempts: DashMap::new(),
        }
    }

    /// Handler succeeded: the event is acked and its retry record cleared.
    pub fn on_success(&self, event_id: Uuid) {
        if self.attempts.remove(&event_id).is_some() {
            info!(event_id = %event_id, state = ?DeliveryState::Acked, "Retry record cleared after success");
        }
    }

    /// Handler failed: schedule a delayed redelivery or dead-letter the event.
    ///
    /// The envelope is re-published rather than left unacked so the retry delay is
    /// broker-scheduled instead of blocking the partition (no sleeping handlers).
    pub async fn on_failure(
        &self,
        source_topic: &str,
        envelope: &EventEnvelope,
        kind: FailureKind,
        error_message: &str,
    ) -> MessagingResult<RouteOutcome> {
        let attempt_count = {
            let mut entry = self
                .attempts
                .entry(envelope.event_id)
                .or_insert_with(|| DeliveryAttempt {
                    event_id: envelope.event_id,
                    attempt_count: 0,
                    last_error: None,
                    next_eligible_at: Utc::now(),
                });
            entry.attempt_count += 1;
            entry.last_error = Some(error_message.to_string());
            entry.attempt_count
        };

        let exhausted = attempt_count >= self.policy.max_attempts;
        if kind == FailureKind::Permanent || exhausted {
            self.dead_letter(source_topic, envelope, attempt_count, error_message)
                .await?;
            return Ok(RouteOutcome::DeadLettered { attempt_count });
        }

        let delay = self.policy.backoff_delay(attempt_count);
        if let Some(mut entry) = self.attempts.get_mut(&envelope.event_id) {
            entry.next_eligible_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        }

        let body = envelope
            .to_value()
            .map_err(|e| crate::messaging::MessagingError::message_serialization(e.to_string()))?;
        self.broker
            .publish_delayed(source_topic, &body, delay)
            .await?;

        warn!(
            event_id = %envelope.event_id,
            correlation_id = %envelope.correlation_id,
            topic = %source_topic,
            attempt = attempt_count,
            delay_ms = delay.as_millis() as u64,
            state = ?DeliveryState::RetryScheduled,
            error = %error_message,
            "Transient failure, redelivery scheduled"
        );

        Ok(RouteOutcome::RetryScheduled {
            attempt: attempt_count,
            delay,
        })
    }

    async fn dead_letter(
        &self,
        source_topic: &str,
        envelope: &EventEnvelope,
        attempt_count: u32,
        error_message: &str,
    ) -> MessagingResult<()> {
        let record = DeadLetterRecord {
            event: envelope
                .to_value()
                .map_err(|e| crate::messaging::MessagingError::message_serialization(e.to_string()))?,
            failure: FailureMetadata {
                source_topic: source_topic.to_string(),
                attempt_count,
                last_error: error_message.to_string(),
                correlation_id: envelope.correlation_id.to_string(),
                failed_at: Utc::now(),
            },
        };

        let dlq = topics::dlq_for(source_topic);
        let body = serde_json::to_value(&record)?;
        self.broker.publish(&dlq, &body).await?;
        self.attempts.remove(&envelope.event_id);

        error!(
            event_id = %envelope.event_id,
            correlation_id = %envelope.correlation_id,
            source_topic = %source_topic,
            dlq_topic = %dlq,
            attempt_count = attempt_count,
            state = ?DeliveryState::DeadLettered,
            error = %error_message,
            "Event dead-lettered"
        );
        Ok(())
    }

    /// Dead-letter a document that failed schema validation. No envelope exists
    /// at this point, so the raw body is recorded as delivered and no retry
    /// state is kept: validation fails identically on every redelivery.
    pub async fn reject_malformed(
        &self,
        source_topic: &str,
        body: &serde_json::Value,
        error_message: &str,
    ) -> MessagingResult<()> {
        let correlation_id = body
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let record = DeadLetterRecord {
            event: body.clone(),
            failure: FailureMetadata {
                source_topic: source_topic.to_string(),
                attempt_count: 1,
                last_error: error_message.to_string(),
                correlation_id: correlation_id.clone(),
                failed_at: Utc::now(),
            },
        };

        let dlq = topics::dlq_for(source_topic);
        let body = serde_json::to_value(&record)?;
        self.broker.publish(&dlq, &body).await?;

        error!(
            correlation_id = %correlation_id,
            source_topic = %source_topic,
            dlq_topic = %dlq,
            error = %error_message,
            "Malformed message dead-lettered without retry"
        );
        Ok(())
    }

    /// Retry record for an event, if one is being tracked.
    pub fn attempt(&self, event_id: Uuid) -> Option<DeliveryAttempt> {
        self.attempts.get(&event_id).map(|a| a.clone())
    }
}
