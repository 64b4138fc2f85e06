//! # In-Memory Broker
//!
//! In-process implementation of [`Broker`] with the same visibility-timeout and
//! redelivery semantics as the external broker. Used by the test suite and local
//! single-process runs; never by a multi-service deployment.

use crate::messaging::broker::{Broker, QueueMessage};
use crate::messaging::errors::{MessagingError, MessagingResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    body: Value,
    enqueued_at: DateTime<Utc>,
    /// Hidden from readers until this instant. Delayed publication and in-flight
    /// deliveries both express themselves through this field.
    visible_at: DateTime<Utc>,
    read_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    live: Vec<StoredMessage>,
    archived: Vec<StoredMessage>,
}

/// In-memory queue set guarded by one mutex. The lock is held only for map
/// bookkeeping, never across an await point.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, queue_name: &str, body: &Value, delay: Duration) -> i64 {
        let mut queues = self.queues.lock();
        let state = queues.entry(queue_name.to_string()).or_default();
        state.next_id += 1;
        let msg_id = state.next_id;
        let now = Utc::now();
        state.live.push(StoredMessage {
            msg_id,
            body: body.clone(),
            enqueued_at: now,
            visible_at: now + chrono::Duration::from_std(delay).unwrap_or_default(),
            read_count: 0,
        });
        msg_id
    }

    /// Messages moved out of the live queue via [`Broker::archive`]. Test hook for
    /// asserting on dead-lettered traffic.
    pub fn archived(&self, queue_name: &str) -> Vec<Value> {
        self.queues
            .lock()
            .get(queue_name)
            .map(|state| state.archived.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// All live message bodies regardless of visibility. Test hook.
    pub fn snapshot(&self, queue_name: &str) -> Vec<Value> {
        self.queues
            .lock()
            .get(queue_name)
            .map(|state| state.live.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        queues.entry(queue_name.to_string()).or_default();
        debug!(queue_name = %queue_name, "Queue created");
        Ok(())
    }

    async fn publish(&self, queue_name: &str, body: &Value) -> MessagingResult<i64> {
        Ok(self.enqueue(queue_name, body, Duration::ZERO))
    }

    async fn publish_delayed(
        &self,
        queue_name: &str,
        body: &Value,
        delay: Duration,
    ) -> MessagingResult<i64> {
        Ok(self.enqueue(queue_name, body, delay))
    }

    async fn read(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let hide_until =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();

        let mut delivered = Vec::new();
        // Arrival order: live is append-only, msg_id increases monotonically.
        for message in state.live.iter_mut() {
            if delivered.len() >= limit {
                break;
            }
            if message.visible_at <= now {
                message.visible_at = hide_until;
                message.read_count += 1;
                delivered.push(QueueMessage {
                    msg_id: message.msg_id,
                    read_count: message.read_count,
                    enqueued_at: message.enqueued_at,
                    body: message.body.clone(),
                });
            }
        }

        Ok(delivered)
    }

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let before = state.live.len();
        state.live.retain(|m| m.msg_id != msg_id);
        if state.live.len() == before {
            return Err(MessagingError::queue_operation(
                queue_name,
                "ack",
                format!("message {msg_id} not found"),
            ));
        }
        Ok(())
    }

    async fn archive(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let position = state
            .live
            .iter()
            .position(|m| m.msg_id == msg_id)
            .ok_or_else(|| {
                MessagingError::queue_operation(
                    queue_name,
                    "archive",
                    format!("message {msg_id} not found"),
                )
            })?;
        let message = state.live.remove(position);
        state.archived.push(message);
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64> {
        let queues = self.queues.lock();
        let state = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(state.live.len() as u64)
    }
}
