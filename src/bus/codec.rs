//! Wire encoding for events.
//!
//! Body is the UTF-8 JSON object of the event's fields with a `MessageType`
//! member naming the event. Decoding ignores that member.

use serde_json::Value;

use super::{BusError, Result};
use crate::message::Event;

/// JSON member carrying the event tag.
pub const MESSAGE_TYPE_FIELD: &str = "MessageType";

/// Serialize an event into its wire body.
pub fn encode<E: Event>(event: &E) -> Result<Vec<u8>> {
    let encode_err = |source| BusError::Encode {
        event: E::MESSAGE_TYPE.to_string(),
        source,
    };

    let mut value = serde_json::to_value(event).map_err(encode_err)?;
    if let Value::Object(fields) = &mut value {
        fields.insert(
            MESSAGE_TYPE_FIELD.to_string(),
            Value::String(event.message_type().to_string()),
        );
    }

    serde_json::to_vec(&value).map_err(encode_err)
}

/// Deserialize a wire body into a concrete event type.
pub fn decode<E: Event>(payload: &[u8]) -> Result<E> {
    serde_json::from_slice(payload).map_err(|source| BusError::PayloadDecode {
        event: E::MESSAGE_TYPE.to_string(),
        source,
    })
}
