#![allow(clippy::doc_markdown)] // Allow technical terms like Ollama, DLQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ReviewFlow Core
//!
//! Event-driven core for AI-assisted pull request review.
//!
//! ## Overview
//!
//! Services in the review platform never call each other directly: a webhook
//! ingress publishes pull request events, a context service enriches them with
//! the diff, and this crate's orchestrator consumes enriched contexts, drives
//! review generation through an AI provider gateway, and publishes the results.
//! Delivery is at-least-once end to end, so every consumer here is idempotent
//! and every failure is either retried with backoff or dead-lettered with
//! enough metadata to replay it.
//!
//! ## Module Organization
//!
//! - [`events`] - Versioned event envelope, payloads, validation, topics, publisher
//! - [`messaging`] - Broker capability trait and the in-memory implementation
//! - [`correlation`] - Correlation ids threaded explicitly through the pipeline
//! - [`idempotency`] - Bounded duplicate-delivery guard
//! - [`dead_letter`] - Retry backoff and dead-letter routing
//! - [`gateway`] - Tokenizer, diff chunking, provider adapters, failover
//! - [`orchestration`] - The review orchestrator and its consumer worker pool
//! - [`config`] - Typed configuration with environment layering
//! - [`error`] - Crate-level error handling
//! - [`logging`] - Structured console and JSON file logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reviewflow_core::config::ConfigManager;
//! use reviewflow_core::messaging::InMemoryBroker;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! reviewflow_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let broker = Arc::new(InMemoryBroker::new());
//! println!(
//!     "provider preference: {:?}",
//!     manager.config().providers.preference
//! );
//! # let _ = broker;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlation;
pub mod dead_letter;
pub mod error;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod logging;
pub mod messaging;
pub mod orchestration;

pub use config::{ConfigManager, ReviewFlowConfig};
pub use correlation::CorrelationId;
pub use dead_letter::{DeadLetterRouter, FailureKind, RetryPolicy, RouteOutcome};
pub use error::{ReviewFlowError, Result};
pub use events::{EventEnvelope, EventPublisher, EventType};
pub use gateway::{ReviewGateway, TokenBudget};
pub use idempotency::{Freshness, IdempotencyGuard};
pub use messaging::{Broker, InMemoryBroker};
pub use orchestration::{EventConsumer, HandlerOutcome, ReviewOrchestrator};
