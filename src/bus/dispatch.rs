//! Delivery dispatch.
//!
//! Turns a raw delivery (event name + payload bytes) into typed handler calls:
//! 1. Look up subscribed handlers
//! 2. Resolve the payload type and decode
//! 3. Invoke each handler in registration order, awaiting each in turn
//!
//! Deliveries are already acknowledged when they reach the dispatcher, so
//! every failure here ends with the message dropped. Failures are logged and,
//! when a dead-letter sink is configured, forwarded there.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::registry::HandlerRegistry;
use super::DeliveryHandler;
use crate::dlq::{DeadLetter, DeadLetterPublisher};

/// What to do with the remaining handlers once one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failing handler; later handlers do not run.
    #[default]
    Abort,
    /// Run every handler regardless of earlier failures.
    Isolate,
}

/// Result of dispatching one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// All handlers ran successfully.
    Delivered { handlers: usize },
    /// No handler or no payload type for the event name. Silently ignored.
    Unroutable { reason: &'static str },
    /// Payload could not be decoded; no handler ran.
    DecodeFailed,
    /// At least one handler failed. Names the first failing handler.
    HandlerFailed { handler: &'static str },
}

impl DispatchOutcome {
    /// Returns true if every registered handler ran and succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Routes deliveries to handlers registered in a shared registry.
pub struct Dispatcher {
    registry: Arc<RwLock<HandlerRegistry>>,
    policy: FailurePolicy,
    dead_letters: Option<DeadLetterPublisher>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<HandlerRegistry>>, policy: FailurePolicy) -> Self {
        Self {
            registry,
            policy,
            dead_letters: None,
        }
    }

    /// Forward decode and handler failures to a dead-letter queue.
    pub fn with_dead_letters(mut self, publisher: DeadLetterPublisher) -> Self {
        self.dead_letters = Some(publisher);
        self
    }

    /// Dispatch one delivery.
    pub async fn on_message(&self, event_name: &str, payload: &[u8]) -> DispatchOutcome {
        // Snapshot under the read lock; never hold it across handler calls.
        let (handlers, descriptor) = {
            let registry = self.registry.read().await;
            (
                registry.handlers_for(event_name),
                registry.payload_type_for(event_name),
            )
        };

        if handlers.is_empty() {
            debug!(event = %event_name, "No handlers registered, dropping message");
            return DispatchOutcome::Unroutable {
                reason: "no handlers registered",
            };
        }

        let Some(descriptor) = descriptor else {
            warn!(event = %event_name, "Handlers registered but payload type unknown, dropping message");
            return DispatchOutcome::Unroutable {
                reason: "no payload type registered",
            };
        };

        let event = match descriptor.decode(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(event = %event_name, error = %e, "Failed to decode payload, dropping message");
                self.dead_letter(DeadLetter::decode_failed(event_name, payload, &e))
                    .await;
                return DispatchOutcome::DecodeFailed;
            }
        };

        let mut first_failure = None;
        for handler in &handlers {
            if let Err(e) = handler.invoke(Arc::clone(&event)).await {
                error!(
                    event = %event_name,
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
                self.dead_letter(DeadLetter::handler_failed(
                    event_name,
                    handler.name(),
                    payload,
                    &e,
                ))
                .await;
                first_failure.get_or_insert(handler.name());

                if self.policy == FailurePolicy::Abort {
                    break;
                }
            }
        }

        match first_failure {
            Some(handler) => DispatchOutcome::HandlerFailed { handler },
            None => {
                debug!(event = %event_name, handlers = handlers.len(), "Dispatched event");
                DispatchOutcome::Delivered {
                    handlers: handlers.len(),
                }
            }
        }
    }

    async fn dead_letter(&self, letter: DeadLetter) {
        if let Some(publisher) = &self.dead_letters {
            if let Err(e) = publisher.publish(letter).await {
                error!(error = %e, "Failed to publish dead letter");
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn on_delivery(&self, routing_key: &str, payload: &[u8]) {
        self.on_message(routing_key, payload).await;
    }
}
