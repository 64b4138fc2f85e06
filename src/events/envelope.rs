//! # Versioned Event Envelope
//!
//! Wire format for every message crossing the broker. The envelope carries identity,
//! type, schema version, timing, and correlation; the payload is the typed body for
//! the declared event type. Validation is strict about required fields and lenient
//! about unknown extra fields, so newer producers stay compatible with older
//! consumers.

use crate::correlation::CorrelationId;
use crate::events::payloads::{
    ContextEnriched, EventPayload, PullRequestReceived, ReviewCompleted, ReviewFailed,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Schema version stamped on every outbound envelope. Consumers accept any version
/// with the same major component.
pub const SCHEMA_VERSION: &str = "1.0";

/// Discriminant for the payload union, also used as the envelope's wire-level tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PullRequestReceived,
    ContextEnriched,
    ReviewCompleted,
    ReviewFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::PullRequestReceived => "pull_request_received",
            EventType::ContextEnriched => "context_enriched",
            EventType::ReviewCompleted => "review_completed",
            EventType::ReviewFailed => "review_failed",
        };
        write!(f, "{name}")
    }
}

/// Schema violations detected while validating a raw broker message. Always
/// permanent: a document that fails validation will fail identically on redelivery.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("Malformed event document: {reason}")]
    MalformedDocument { reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unsupported schema version: {version} (supported major: 1)")]
    UnsupportedVersion { version: String },

    #[error("Payload does not match declared event type {event_type}: {reason}")]
    PayloadMismatch { event_type: String, reason: String },
}

/// Envelope for one domain event.
///
/// `event_id` is globally unique per logical occurrence and reused verbatim on
/// redelivery, which is what makes it usable as an idempotency key. Once published,
/// the envelope is owned by the broker and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub schema_version: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub payload: EventPayload,
}

/// On-the-wire shape: the payload rides as a plain object, tagged by `event_type`
/// at the envelope level rather than inside the payload document.
#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    event_id: Uuid,
    event_type: EventType,
    schema_version: String,
    occurred_at: DateTime<Utc>,
    correlation_id: CorrelationId,
    payload: Value,
}

impl EventEnvelope {
    /// Build a new envelope with a fresh event id, typed from its payload.
    pub fn new(correlation_id: CorrelationId, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: payload_type(&payload),
            schema_version: SCHEMA_VERSION.to_string(),
            occurred_at: Utc::now(),
            correlation_id,
            payload,
        }
    }

    /// Idempotency key for this logical occurrence.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.event_type, self.event_id)
    }

    /// Serialize to the wire representation.
    pub fn serialize(&self) -> Result<Vec<u8>, SchemaError> {
        serde_json::to_vec(&self.to_raw()?).map_err(|e| SchemaError::MalformedDocument {
            reason: e.to_string(),
        })
    }

    /// Serialize to a JSON value, the form the broker stores.
    pub fn to_value(&self) -> Result<Value, SchemaError> {
        serde_json::to_value(self.to_raw()?).map_err(|e| SchemaError::MalformedDocument {
            reason: e.to_string(),
        })
    }

    fn to_raw(&self) -> Result<RawEnvelope, SchemaError> {
        let payload = match &self.payload {
            EventPayload::PullRequestReceived(p) => serde_json::to_value(p),
            EventPayload::ContextEnriched(p) => serde_json::to_value(p),
            EventPayload::ReviewCompleted(p) => serde_json::to_value(p),
            EventPayload::ReviewFailed(p) => serde_json::to_value(p),
        }
        .map_err(|e| SchemaError::MalformedDocument {
            reason: e.to_string(),
        })?;

        Ok(RawEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            schema_version: self.schema_version.clone(),
            occurred_at: self.occurred_at,
            correlation_id: self.correlation_id,
            payload,
        })
    }
}

fn payload_type(payload: &EventPayload) -> EventType {
    match payload {
        EventPayload::PullRequestReceived(_) => EventType::PullRequestReceived,
        EventPayload::ContextEnriched(_) => EventType::ContextEnriched,
        EventPayload::ReviewCompleted(_) => EventType::ReviewCompleted,
        EventPayload::ReviewFailed(_) => EventType::ReviewFailed,
    }
}

/// Validate raw bytes from the broker into a typed envelope.
pub fn validate(raw: &[u8]) -> Result<EventEnvelope, SchemaError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| SchemaError::MalformedDocument {
        reason: e.to_string(),
    })?;
    validate_value(&value)
}

/// Validate an already-parsed JSON document into a typed envelope.
pub fn validate_value(value: &Value) -> Result<EventEnvelope, SchemaError> {
    let object = value.as_object().ok_or_else(|| SchemaError::MalformedDocument {
        reason: "event document must be a JSON object".to_string(),
    })?;

    // Required fields reject when absent; unknown extra fields are accepted.
    for field in [
        "event_id",
        "event_type",
        "schema_version",
        "occurred_at",
        "correlation_id",
        "payload",
    ] {
        if !object.contains_key(field) {
            return Err(SchemaError::MissingField {
                field: field.to_string(),
            });
        }
    }

    let raw: RawEnvelope =
        serde_json::from_value(value.clone()).map_err(|e| SchemaError::InvalidField {
            field: "envelope".to_string(),
            reason: e.to_string(),
        })?;

    check_version(&raw.schema_version)?;

    let payload = deserialize_payload(raw.event_type, raw.payload)?;

    Ok(EventEnvelope {
        event_id: raw.event_id,
        event_type: raw.event_type,
        schema_version: raw.schema_version,
        occurred_at: raw.occurred_at,
        correlation_id: raw.correlation_id,
        payload,
    })
}

fn check_version(version: &str) -> Result<(), SchemaError> {
    let major = version.split('.').next().unwrap_or_default();
    if major == "1" {
        Ok(())
    } else {
        Err(SchemaError::UnsupportedVersion {
            version: version.to_string(),
        })
    }
}

fn deserialize_payload(event_type: EventType, payload: Value) -> Result<EventPayload, SchemaError> {
    let mismatch = |e: serde_json::Error| SchemaError::PayloadMismatch {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    };

    match event_type {
        EventType::PullRequestReceived => serde_json::from_value::<PullRequestReceived>(payload)
            .map(EventPayload::PullRequestReceived)
            .map_err(mismatch),
        EventType::ContextEnriched => serde_json::from_value::<ContextEnriched>(payload)
            .map(EventPayload::ContextEnriched)
            .map_err(mismatch),
        EventType::ReviewCompleted => serde_json::from_value::<ReviewCompleted>(payload)
            .map(EventPayload::ReviewCompleted)
            .map_err(mismatch),
        EventType::ReviewFailed => serde_json::from_value::<ReviewFailed>(payload)
            .map(EventPayload::ReviewFailed)
            .map_err(mismatch),
    }
}
