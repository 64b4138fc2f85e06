//! # Crate-Level Error Types
//!
//! One top-level error for callers that cross module boundaries. Modules keep
//! their own typed errors; conversions collapse them here at the public surface.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewFlowError {
    EventError(String),
    MessagingError(String),
    IdempotencyError(String),
    GatewayError(String),
    OrchestrationError(String),
    ConfigurationError(String),
}

impl fmt::Display for ReviewFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewFlowError::EventError(msg) => write!(f, "Event error: {msg}"),
            ReviewFlowError::MessagingError(msg) => write!(f, "Messaging error: {msg}"),
            ReviewFlowError::IdempotencyError(msg) => write!(f, "Idempotency error: {msg}"),
            ReviewFlowError::GatewayError(msg) => write!(f, "Gateway error: {msg}"),
            ReviewFlowError::OrchestrationError(msg) => write!(f, "Orchestration error: {msg}"),
            ReviewFlowError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ReviewFlowError {}

impl From<crate::messaging::MessagingError> for ReviewFlowError {
    fn from(error: crate::messaging::MessagingError) -> Self {
        ReviewFlowError::MessagingError(error.to_string())
    }
}

impl From<crate::events::EventError> for ReviewFlowError {
    fn from(error: crate::events::EventError) -> Self {
        ReviewFlowError::EventError(error.to_string())
    }
}

impl From<crate::events::SchemaError> for ReviewFlowError {
    fn from(error: crate::events::SchemaError) -> Self {
        ReviewFlowError::EventError(error.to_string())
    }
}

impl From<crate::gateway::GatewayError> for ReviewFlowError {
    fn from(error: crate::gateway::GatewayError) -> Self {
        ReviewFlowError::GatewayError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReviewFlowError>;
