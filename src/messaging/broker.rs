//! # Broker Abstraction
//!
//! The broker is the sole transport between services: nothing in this crate calls
//! another service directly. This module defines the capability trait consumers and
//! publishers are handed; the production adapter (backed by whatever queueing
//! technology the deployment runs) lives outside this crate, and
//! [`crate::messaging::InMemoryBroker`] provides the same semantics in-process for
//! tests and local runs.
//!
//! Delivery semantics are at-least-once: a message read from a queue becomes
//! invisible for the visibility timeout and reappears unless acked, so every
//! consumer must be idempotent.

use crate::messaging::errors::MessagingResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// One delivery of a queued message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Broker-assigned, per-queue monotonically increasing id. Ordering within one
    /// queue partition follows this id.
    pub msg_id: i64,
    /// How many times this message has been delivered, including this one.
    pub read_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub body: Value,
}

/// Capability trait for the external message broker.
///
/// Modeled as pull-based consumption with visibility timeouts: `read` hides the
/// returned messages for `visibility_timeout`, `ack` removes them permanently, and
/// an unacked message is redelivered once the timeout lapses. `publish_delayed`
/// backs the retry path, so no handler ever sleeps to reschedule work.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Create a queue if it does not exist. Idempotent.
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Append a message to a queue, returning the broker-assigned message id.
    async fn publish(&self, queue_name: &str, body: &Value) -> MessagingResult<i64>;

    /// Append a message that only becomes visible to consumers after `delay`.
    async fn publish_delayed(
        &self,
        queue_name: &str,
        body: &Value,
        delay: Duration,
    ) -> MessagingResult<i64>;

    /// Read up to `limit` visible messages in arrival order, hiding them for
    /// `visibility_timeout`.
    async fn read(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>>;

    /// Acknowledge (delete) a delivered message.
    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;

    /// Move a delivered message out of the live queue into the queue's archive.
    async fn archive(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;

    /// Number of live (visible + in-flight) messages on a queue.
    async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64>;
}
