//! # Review Orchestration
//!
//! The consuming half of the pipeline: a worker pool pulls enriched-context
//! events off the broker and the orchestrator turns each one into at most one
//! published review, routing failures through the dead-letter machinery.

pub mod consumer;
pub mod orchestrator;

pub use consumer::{ConsumerSettings, EventConsumer};
pub use orchestrator::{HandlerOutcome, ReviewOrchestrator};
