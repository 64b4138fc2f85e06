//! # Event Contract Library
//!
//! The versioned schema for every domain event exchanged between services: envelope
//! shape, payload union, validation rules, topic names, and the publisher that puts
//! envelopes on the broker.

pub mod envelope;
pub mod payloads;
pub mod publisher;

pub use envelope::{validate, validate_value, EventEnvelope, EventType, SchemaError, SCHEMA_VERSION};
pub use payloads::{
    ContextEnriched, ContextStatus, EventPayload, PullRequestReceived, ReviewComment,
    ReviewCompleted, ReviewFailed, ReviewRequest, ReviewRequestMetadata, ReviewResult,
    TokenUsage, WebhookAction,
};
pub use publisher::EventPublisher;

use crate::messaging::MessagingError;
use thiserror::Error;

/// Logical (technology-agnostic) broker topic names.
pub mod topics {
    pub const PR_RECEIVED: &str = "pr.received";
    pub const CONTEXT_ENRICHED: &str = "pr.context.enriched";
    pub const REVIEW_COMPLETED: &str = "pr.review.completed";

    /// Each source topic has its own dead-letter destination.
    pub fn dlq_for(topic: &str) -> String {
        format!("{topic}.dlq")
    }
}

/// Failures while publishing or materializing events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}
