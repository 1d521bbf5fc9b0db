//! AMQP integration for the queue service
//!
//! This module handles the broker connection and publishing of queue and
//! match events for downstream consumers.

pub mod connection;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, MockEventPublisher, NullEventPublisher, PublisherConfig,
};
