//! In-process command mediator.
//!
//! Resolves the single handler registered for a command's concrete type and
//! awaits its boolean result. Commands never reach the broker.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{BusError, HandlerError, Result};
use crate::message::Command;

/// Handler for one command type.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Execute the command and report whether it succeeded.
    async fn handle(&self, command: C) -> std::result::Result<bool, HandlerError>;
}

struct Registered {
    name: &'static str,
    /// Holds an `Arc<dyn CommandHandler<C>>` for the keyed command type.
    handler: Box<dyn Any + Send + Sync>,
}

/// Command type → handler.
///
/// Populated at startup, then handed to the event bus.
#[derive(Default)]
pub struct Mediator {
    handlers: HashMap<TypeId, Registered>,
}

impl Mediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for command `C`. One handler per command type.
    pub fn register<C, H>(&mut self, handler: H) -> Result<()>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let key = TypeId::of::<C>();
        if self.handlers.contains_key(&key) {
            return Err(BusError::DuplicateCommandHandler(C::MESSAGE_TYPE.to_string()));
        }

        let handler: Arc<dyn CommandHandler<C>> = Arc::new(handler);
        self.handlers.insert(
            key,
            Registered {
                name: type_name::<H>(),
                handler: Box::new(handler),
            },
        );

        debug!(
            command = C::MESSAGE_TYPE,
            handler = type_name::<H>(),
            "Registered command handler"
        );
        Ok(())
    }

    /// Send a command to its handler and return the handler's result.
    pub async fn send<C: Command>(&self, command: C) -> Result<bool> {
        let registered = self
            .handlers
            .get(&TypeId::of::<C>())
            .ok_or_else(|| BusError::NoCommandHandler(C::MESSAGE_TYPE.to_string()))?;

        let handler = registered
            .handler
            .downcast_ref::<Arc<dyn CommandHandler<C>>>()
            .ok_or_else(|| BusError::NoCommandHandler(C::MESSAGE_TYPE.to_string()))?;

        debug!(
            command = command.message_type(),
            handler = registered.name,
            "Sending command"
        );

        handler
            .handle(command)
            .await
            .map_err(|source| BusError::HandlerInvocation {
                handler: registered.name.to_string(),
                source,
            })
    }

    /// Whether a handler is registered for `C`.
    pub fn handles<C: Command>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<C>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::{DateTime, Utc};

    struct Approve {
        accept: bool,
        at: DateTime<Utc>,
    }

    impl Approve {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                at: Utc::now(),
            }
        }
    }

    impl Message for Approve {
        const MESSAGE_TYPE: &'static str = "Approve";
    }

    impl Command for Approve {
        fn timestamp(&self) -> DateTime<Utc> {
            self.at
        }
    }

    struct ApproveHandler;

    #[async_trait]
    impl CommandHandler<Approve> for ApproveHandler {
        async fn handle(&self, command: Approve) -> std::result::Result<bool, HandlerError> {
            Ok(command.accept)
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl CommandHandler<Approve> for RejectingHandler {
        async fn handle(&self, _command: Approve) -> std::result::Result<bool, HandlerError> {
            Err(HandlerError::Failed("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn test_send_returns_handler_result() {
        let mut mediator = Mediator::new();
        mediator.register::<Approve, _>(ApproveHandler).unwrap();

        assert!(mediator.send(Approve::new(true)).await.unwrap());
        assert!(!mediator.send(Approve::new(false)).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_without_handler() {
        let mediator = Mediator::new();
        let result = mediator.send(Approve::new(true)).await;
        assert!(matches!(result, Err(BusError::NoCommandHandler(ref name)) if name == "Approve"));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let mut mediator = Mediator::new();
        mediator.register::<Approve, _>(RejectingHandler).unwrap();

        let result = mediator.send(Approve::new(true)).await;
        assert!(matches!(result, Err(BusError::HandlerInvocation { .. })));
    }

    #[test]
    fn test_second_handler_rejected() {
        let mut mediator = Mediator::new();
        mediator.register::<Approve, _>(ApproveHandler).unwrap();

        let result = mediator.register::<Approve, _>(RejectingHandler);
        assert!(matches!(result, Err(BusError::DuplicateCommandHandler(_))));
        assert!(mediator.handles::<Approve>());
    }

    #[test]
    fn test_command_timestamp_set_at_construction() {
        let before = Utc::now();
        let command = Approve::new(true);
        assert!(command.timestamp() >= before);
        assert!(command.timestamp() <= Utc::now());
    }
}
