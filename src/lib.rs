//! Microbus - event bus for message-driven microservices
//!
//! Publishes domain events to RabbitMQ queues named after the event type,
//! routes deliveries to registered handlers, and dispatches commands to an
//! in-process handler.

pub mod bus;
pub mod config;
pub mod dlq;
pub mod domain;
pub mod mediator;
pub mod message;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bus::{BusError, EventBus, EventHandler, EventPublisher, HandlerError};
pub use config::Config;
pub use mediator::{CommandHandler, Mediator};
pub use message::{Command, Event, Message};
