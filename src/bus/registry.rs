//! Handler registry and known-event-types index.
//!
//! Maps an event name to the handlers subscribed to it and to the decoder for
//! its concrete payload type. Registrations are only removed to roll back a
//! subscribe whose consumer failed to start.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::{codec, BusError, EventHandler, HandlerError, Result};
use crate::message::Event;

/// Type-erased decoded event.
pub type AnyEvent = Arc<dyn Any + Send + Sync>;

/// How to turn a payload for a given event name back into a typed value.
#[derive(Clone, Copy)]
pub struct EventDescriptor {
    /// Event name (queue name and wire tag).
    pub name: &'static str,
    /// Rust type bound to the name.
    pub type_name: &'static str,
    type_id: TypeId,
    decode: fn(&[u8]) -> Result<AnyEvent>,
}

impl EventDescriptor {
    fn of<E: Event>() -> Self {
        Self {
            name: E::MESSAGE_TYPE,
            type_name: type_name::<E>(),
            type_id: TypeId::of::<E>(),
            decode: decode_erased::<E>,
        }
    }

    /// Decode a raw payload into the bound event type.
    pub fn decode(&self, payload: &[u8]) -> Result<AnyEvent> {
        (self.decode)(payload)
    }
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn decode_erased<E: Event>(payload: &[u8]) -> Result<AnyEvent> {
    let event: E = codec::decode(payload)?;
    Ok(Arc::new(event))
}

/// A registered handler, erased over its event type.
pub trait RegisteredHandler: Send + Sync {
    /// Display name of the handler type.
    fn name(&self) -> &'static str;

    /// Build a fresh handler and run it against `event`.
    fn invoke(&self, event: AnyEvent) -> BoxFuture<'static, std::result::Result<(), HandlerError>>;
}

struct FactoryHandler<E, H, F> {
    factory: F,
    _marker: PhantomData<fn() -> (E, H)>,
}

impl<E, H, F> RegisteredHandler for FactoryHandler<E, H, F>
where
    E: Event,
    H: EventHandler<E> + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        type_name::<H>()
    }

    fn invoke(&self, event: AnyEvent) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        let handler = (self.factory)();
        Box::pin(async move {
            let event = Arc::downcast::<E>(event).map_err(|_| {
                HandlerError::Failed(format!(
                    "payload is not a {}",
                    type_name::<E>()
                ))
            })?;
            handler.handle((*event).clone()).await
        })
    }
}

struct Registration {
    handler_type: TypeId,
    handler: Arc<dyn RegisteredHandler>,
}

/// Event name → handlers, and event name → payload type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Vec<Registration>>,
    event_types: HashMap<&'static str, EventDescriptor>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe handler type `H` to event `E`.
    ///
    /// `factory` is called once per delivered message to build the handler.
    /// The first registration for an event name also records its payload type.
    pub fn register<E, H>(&mut self, factory: impl Fn() -> H + Send + Sync + 'static) -> Result<()>
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let descriptor = EventDescriptor::of::<E>();
        if let Some(existing) = self.event_types.get(E::MESSAGE_TYPE) {
            if existing.type_id != descriptor.type_id {
                return Err(BusError::EventNameConflict {
                    name: E::MESSAGE_TYPE.to_string(),
                    existing: existing.type_name,
                    requested: descriptor.type_name,
                });
            }
        }

        let handler_type = TypeId::of::<H>();
        let registrations = self.handlers.entry(E::MESSAGE_TYPE).or_default();
        if registrations.iter().any(|r| r.handler_type == handler_type) {
            return Err(BusError::DuplicateRegistration {
                event: E::MESSAGE_TYPE.to_string(),
                handler: type_name::<H>().to_string(),
            });
        }

        registrations.push(Registration {
            handler_type,
            handler: Arc::new(FactoryHandler::<E, H, _> {
                factory,
                _marker: PhantomData,
            }),
        });
        self.event_types.entry(E::MESSAGE_TYPE).or_insert(descriptor);

        debug!(
            event = E::MESSAGE_TYPE,
            handler = type_name::<H>(),
            "Registered event handler"
        );

        Ok(())
    }

    /// Handlers for an event name, in registration order. Empty if none.
    pub fn handlers_for(&self, event_name: &str) -> Vec<Arc<dyn RegisteredHandler>> {
        self.handlers
            .get(event_name)
            .map(|regs| regs.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default()
    }

    /// Payload type bound to an event name, if any handler subscribed to it.
    pub fn payload_type_for(&self, event_name: &str) -> Option<EventDescriptor> {
        self.event_types.get(event_name).copied()
    }

    /// Drop the registration of handler `H` for event `E`.
    ///
    /// The payload type binding goes with the last handler for the event.
    /// Returns false if `H` was not registered.
    pub fn remove<E, H>(&mut self) -> bool
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let handler_type = TypeId::of::<H>();
        let Some(registrations) = self.handlers.get_mut(E::MESSAGE_TYPE) else {
            return false;
        };

        let before = registrations.len();
        registrations.retain(|r| r.handler_type != handler_type);
        let removed = registrations.len() != before;

        if registrations.is_empty() {
            self.handlers.remove(E::MESSAGE_TYPE);
            self.event_types.remove(E::MESSAGE_TYPE);
        }

        if removed {
            debug!(
                event = E::MESSAGE_TYPE,
                handler = type_name::<H>(),
                "Removed event handler"
            );
        }
        removed
    }
}
