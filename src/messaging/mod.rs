//! # Messaging
//!
//! Broker abstraction and error taxonomy for queue-based event exchange.

pub mod broker;
pub mod errors;
pub mod memory;

pub use broker::{Broker, QueueMessage};
pub use errors::{MessagingError, MessagingResult};
pub use memory::InMemoryBroker;
