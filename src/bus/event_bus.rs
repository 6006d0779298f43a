//! Event bus façade.
//!
//! Composes the broker gateway, handler registry, dispatcher and command
//! mediator behind three operations: `publish`, `subscribe`, `send_command`.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::dispatch::{Dispatcher, FailurePolicy};
use super::registry::HandlerRegistry;
use super::{codec, BrokerGateway, DeliveryHandler, EventHandler, Result};
use crate::config::Config;
use crate::dlq::DeadLetterPublisher;
use crate::mediator::Mediator;
use crate::message::{Command, Event};

/// Publishes events to the queue named after their type.
///
/// Cheap to clone; command handlers hold one to emit events.
#[derive(Clone)]
pub struct EventPublisher {
    gateway: Arc<dyn BrokerGateway>,
}

impl EventPublisher {
    pub fn new(gateway: Arc<dyn BrokerGateway>) -> Self {
        Self { gateway }
    }

    /// Serialize `event` and send it to the `E::MESSAGE_TYPE` queue.
    pub async fn publish<E: Event>(&self, event: &E) -> Result<()> {
        let payload = codec::encode(event)?;
        self.gateway.publish(E::MESSAGE_TYPE, payload).await?;
        debug!(event = E::MESSAGE_TYPE, "Published event");
        Ok(())
    }
}

/// Process-local event bus.
pub struct EventBus {
    gateway: Arc<dyn BrokerGateway>,
    publisher: EventPublisher,
    registry: Arc<RwLock<HandlerRegistry>>,
    dispatcher: Arc<Dispatcher>,
    mediator: Mediator,
}

impl EventBus {
    /// Create a bus with reference dispatch behavior: the first failing
    /// handler stops the rest, and failures are only logged.
    pub fn new(gateway: Arc<dyn BrokerGateway>, mediator: Mediator) -> Self {
        let registry = Arc::new(RwLock::new(HandlerRegistry::new()));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), FailurePolicy::Abort);
        Self::assemble(gateway, mediator, registry, dispatcher)
    }

    /// Create a bus with dispatch and dead-letter options from configuration.
    pub fn from_config(gateway: Arc<dyn BrokerGateway>, mediator: Mediator, config: &Config) -> Self {
        let registry = Arc::new(RwLock::new(HandlerRegistry::new()));
        let policy = if config.dispatch.isolate_handler_failures {
            FailurePolicy::Isolate
        } else {
            FailurePolicy::Abort
        };

        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), policy);
        if config.dead_letter.enabled {
            dispatcher = dispatcher.with_dead_letters(DeadLetterPublisher::new(
                Arc::clone(&gateway),
                config.dead_letter.queue_suffix.clone(),
            ));
        }

        info!(
            policy = ?policy,
            dead_letter = config.dead_letter.enabled,
            "Event bus initialized"
        );

        Self::assemble(gateway, mediator, registry, dispatcher)
    }

    fn assemble(
        gateway: Arc<dyn BrokerGateway>,
        mediator: Mediator,
        registry: Arc<RwLock<HandlerRegistry>>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            publisher: EventPublisher::new(Arc::clone(&gateway)),
            gateway,
            registry,
            dispatcher: Arc::new(dispatcher),
            mediator,
        }
    }

    /// Publish an event to its queue.
    pub async fn publish<E: Event>(&self, event: &E) -> Result<()> {
        self.publisher.publish(event).await
    }

    /// Register handler `H` for event `E` and start a consumer on `E`'s queue.
    ///
    /// `factory` builds a fresh handler for every delivered message.
    /// Registering the same handler type twice for one event fails with
    /// `DuplicateRegistration`. Each successful call starts its own consumer
    /// loop, so two handlers on one event mean two competing consumers.
    /// If the consumer cannot be started the registration is rolled back and
    /// the call can be retried.
    pub async fn subscribe<E, H>(&self, factory: impl Fn() -> H + Send + Sync + 'static) -> Result<()>
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        self.registry.write().await.register::<E, H>(factory)?;

        let dispatcher: Arc<dyn DeliveryHandler> = Arc::clone(&self.dispatcher) as Arc<dyn DeliveryHandler>;
        if let Err(e) = self
            .gateway
            .start_consuming(E::MESSAGE_TYPE, dispatcher)
            .await
        {
            self.registry.write().await.remove::<E, H>();
            warn!(
                event = E::MESSAGE_TYPE,
                handler = std::any::type_name::<H>(),
                error = %e,
                "Consumer failed to start, subscription rolled back"
            );
            return Err(e);
        }

        info!(
            event = E::MESSAGE_TYPE,
            handler = std::any::type_name::<H>(),
            "Subscribed handler"
        );
        Ok(())
    }

    /// Route a command in-process to its single handler and return its result.
    ///
    /// Never touches the broker.
    pub async fn send_command<C: Command>(&self, command: C) -> Result<bool> {
        self.mediator.send(command).await
    }

    /// A publisher sharing this bus's gateway.
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }
}
