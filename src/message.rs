//! Message taxonomy.
//!
//! Everything carried by the bus is a [`Message`]. Two shapes exist:
//! - [`Command`]: a directed request routed in-process to exactly one handler.
//! - [`Event`]: a broadcast fact routed through the broker to any number of
//!   subscribers.
//!
//! The `MESSAGE_TYPE` tag is the wire-level discriminator. For events it is
//! also the queue name, so it must be unique across the process.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything that travels on the bus.
pub trait Message: Send + Sync + 'static {
    /// Name of the concrete type (e.g. `"TransferCreatedEvent"`).
    const MESSAGE_TYPE: &'static str;

    /// The tag of this message instance.
    fn message_type(&self) -> &'static str {
        Self::MESSAGE_TYPE
    }
}

/// A fact published to the broker and consumed by zero or more handlers.
///
/// Events are plain data: they carry no identity beyond their payload and are
/// serialized field-for-field onto the wire.
pub trait Event: Message + Serialize + DeserializeOwned + Clone {}

/// A directed request handled synchronously by a single in-process handler.
pub trait Command: Message {
    /// Creation time, stamped when the command is constructed.
    fn timestamp(&self) -> DateTime<Utc>;
}
