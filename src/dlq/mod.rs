//! Dead letter publishing.
//!
//! Deliveries are auto-acknowledged, so a message that fails to decode or
//! whose handler fails is gone once the dispatcher returns. When enabled, the
//! dispatcher forwards such messages here for inspection and manual replay.
//!
//! ## Queue Naming
//!
//! Dead letters go to `{event_name}{suffix}`, e.g. `TransferCreatedEvent.dlq`,
//! declared with the same properties as event queues.
//!
//! ## Message Format
//!
//! JSON object with the event name, failing handler (if any), failure kind,
//! error text, the original payload (UTF-8, lossy), and a UTC timestamp.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::{BrokerGateway, BusError, Result};

/// Default suffix appended to the event name to form the DLQ name.
pub const DEFAULT_DLQ_SUFFIX: &str = ".dlq";

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Payload could not be decoded into the registered type.
    DecodeFailed,
    /// A handler returned an error.
    HandlerFailed,
}

/// A failed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event_name: String,
    pub handler: Option<String>,
    pub kind: FailureKind,
    pub error: String,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn decode_failed(event_name: &str, payload: &[u8], error: &dyn std::error::Error) -> Self {
        Self {
            event_name: event_name.to_string(),
            handler: None,
            kind: FailureKind::DecodeFailed,
            error: error_chain(error),
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }

    pub fn handler_failed(
        event_name: &str,
        handler: &str,
        payload: &[u8],
        error: &dyn std::error::Error,
    ) -> Self {
        Self {
            event_name: event_name.to_string(),
            handler: Some(handler.to_string()),
            kind: FailureKind::HandlerFailed,
            error: error_chain(error),
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }
}

/// Render an error and its sources as `outer: inner: ...`.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Build the DLQ name for an event.
pub fn dlq_name(event_name: &str, suffix: &str) -> String {
    format!("{}{}", event_name, suffix)
}

/// Publishes dead letters through a broker gateway.
#[derive(Clone)]
pub struct DeadLetterPublisher {
    gateway: Arc<dyn BrokerGateway>,
    suffix: String,
}

impl DeadLetterPublisher {
    pub fn new(gateway: Arc<dyn BrokerGateway>, suffix: impl Into<String>) -> Self {
        Self {
            gateway,
            suffix: suffix.into(),
        }
    }

    pub async fn publish(&self, letter: DeadLetter) -> Result<()> {
        let queue = dlq_name(&letter.event_name, &self.suffix);
        let body = serde_json::to_vec(&letter).map_err(|source| BusError::Encode {
            event: queue.clone(),
            source,
        })?;

        self.gateway.publish(&queue, body).await?;

        info!(
            queue = %queue,
            kind = ?letter.kind,
            handler = ?letter.handler,
            "Dead-lettered message"
        );
        Ok(())
    }
}
