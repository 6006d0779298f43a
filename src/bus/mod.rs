//! Event bus over a message broker.
//!
//! This module contains:
//! - `BrokerGateway` trait: publishing and consumer loops
//! - `DeliveryHandler` trait: what a consumer loop hands each delivery to
//! - `EventHandler` trait: typed handlers for decoded events
//! - `HandlerRegistry`, `Dispatcher`, and the `EventBus` façade
//! - Gateways: AMQP (RabbitMQ) and in-process channels

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::Event;

pub mod codec;
pub mod dispatch;
pub mod event_bus;
pub mod registry;

// Gateway implementations
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpGateway;
pub use channel::ChannelGateway;
pub use dispatch::{DispatchOutcome, Dispatcher, FailurePolicy};
pub use event_bus::{EventBus, EventPublisher};
pub use registry::{EventDescriptor, HandlerRegistry};

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Handler '{handler}' is already registered for '{event}'")]
    DuplicateRegistration { event: String, handler: String },

    #[error("Event name '{name}' is bound to {existing}, cannot bind {requested}")]
    EventNameConflict {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Failed to encode '{event}'")]
    Encode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode '{event}' payload")]
    PayloadDecode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Handler '{handler}' failed")]
    HandlerInvocation {
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error("No command handler registered for '{0}'")]
    NoCommandHandler(String),

    #[error("A command handler is already registered for '{0}'")]
    DuplicateCommandHandler(String),
}

/// Failure raised by an event or command handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Publishing from handler failed: {0}")]
    Publish(#[source] Box<BusError>),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        HandlerError::Publish(Box::new(err))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Typed handler for one event type.
///
/// A fresh handler value is built for every delivered message, so
/// implementations may keep per-message state.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// Process one decoded event.
    async fn handle(&self, event: E) -> std::result::Result<(), HandlerError>;
}

/// Receiver of raw deliveries from a consumer loop.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Called once per delivery, in delivery order for a given consumer.
    async fn on_delivery(&self, routing_key: &str, payload: &[u8]);
}

/// Broker-facing operations.
///
/// Implementations:
/// - `AmqpGateway`: RabbitMQ via a pooled AMQP connection
/// - `ChannelGateway`: in-process queues on tokio channels
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Declare `queue` and send `payload` to it through the default exchange.
    ///
    /// Does not wait for broker confirmation.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Declare `queue` and attach a consumer loop feeding `handler`.
    ///
    /// Returns once the consumer is attached; the loop runs for the lifetime
    /// of the process. Deliveries are acknowledged on receipt.
    async fn start_consuming(&self, queue: &str, handler: Arc<dyn DeliveryHandler>) -> Result<()>;
}
