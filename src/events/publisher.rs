//! # Event Publisher
//!
//! Serializes envelopes through the contract library and hands them to the broker.
//! Once published, the envelope belongs to the broker; the producer never mutates it
//! afterwards.

use crate::events::envelope::EventEnvelope;
use crate::events::EventError;
use crate::messaging::Broker;
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes domain events to broker topics.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish an envelope to a topic, returning the broker message id.
    pub async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<i64, EventError> {
        debug!(
            topic = %topic,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            correlation_id = %envelope.correlation_id,
            "Publishing event"
        );

        let body = envelope.to_value()?;
        let msg_id = self.broker.publish(topic, &body).await?;

        info!(
            topic = %topic,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            correlation_id = %envelope.correlation_id,
            msg_id = msg_id,
            "Event published"
        );
        Ok(msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::events::envelope::validate_value;
    use crate::events::payloads::{EventPayload, ReviewFailed};
    use crate::messaging::InMemoryBroker;

    #[tokio::test]
    async fn test_publish_writes_valid_envelope_to_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_queue("pr.review.completed").await.unwrap();
        let publisher = EventPublisher::new(broker.clone());

        let envelope = EventEnvelope::new(
            CorrelationId::generate(),
            EventPayload::ReviewFailed(ReviewFailed {
                review_id: "r1".to_string(),
                context_id: "c1".to_string(),
                repository_owner: "octo".to_string(),
                repository_name: "widgets".to_string(),
                pull_request_number: 3,
                error_message: "all providers exhausted".to_string(),
            }),
        );

        publisher
            .publish("pr.review.completed", &envelope)
            .await
            .unwrap();

        let stored = broker.snapshot("pr.review.completed");
        assert_eq!(stored.len(), 1);
        let back = validate_value(&stored[0]).unwrap();
        assert_eq!(back, envelope);
    }
}
