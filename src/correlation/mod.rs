//! # Correlation Context
//!
//! Identifies every event, log record, and provider call that descends from a single
//! originating webhook. The id is carried as an explicit field on envelopes and
//! requests rather than ambient task-local state, so propagation stays correct across
//! spawned tasks and broker hops.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::Span;
use uuid::Uuid;

/// Identifier tying together all events causally descended from one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh id, starting a new causal chain.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id received on a message or header.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Resolve an optional inbound id: a missing or invalid value starts a new chain.
    pub fn resolve(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    pub fn is_valid(value: &str) -> bool {
        Self::parse(value).is_some()
    }

    /// Span carrying the correlation id as a structured field. Every log record
    /// emitted inside the span (including from spawned continuations instrumented
    /// with it) carries the id.
    pub fn span(&self) -> Span {
        tracing::info_span!("correlation", correlation_id = %self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
