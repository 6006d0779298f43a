//! Banking side: accepts transfer requests and announces them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::{EventPublisher, HandlerError};
use crate::mediator::CommandHandler;
use crate::message::{Command, Event, Message};

/// Request to move `amount` from account `from` to account `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTransferCommand {
    pub from: i32,
    pub to: i32,
    pub amount: Decimal,
    timestamp: DateTime<Utc>,
}

impl CreateTransferCommand {
    pub fn new(from: i32, to: i32, amount: Decimal) -> Self {
        Self {
            from,
            to,
            amount,
            timestamp: Utc::now(),
        }
    }
}

impl Message for CreateTransferCommand {
    const MESSAGE_TYPE: &'static str = "CreateTransferCommand";
}

impl Command for CreateTransferCommand {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A transfer was accepted.
///
/// Field names on the wire are `From`, `To`, `Amount`; the amount travels as
/// a JSON number carrying its exact digits and scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferCreatedEvent {
    pub from: i32,
    pub to: i32,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
}

impl TransferCreatedEvent {
    pub fn new(from: i32, to: i32, amount: Decimal) -> Self {
        Self { from, to, amount }
    }
}

impl Message for TransferCreatedEvent {
    const MESSAGE_TYPE: &'static str = "TransferCreatedEvent";
}

impl Event for TransferCreatedEvent {}

/// Publishes `TransferCreatedEvent` for each accepted transfer.
pub struct TransferCommandHandler {
    publisher: EventPublisher,
}

impl TransferCommandHandler {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl CommandHandler<CreateTransferCommand> for TransferCommandHandler {
    async fn handle(&self, command: CreateTransferCommand) -> Result<bool, HandlerError> {
        let event = TransferCreatedEvent::new(command.from, command.to, command.amount);
        self.publisher.publish(&event).await?;

        info!(
            from = command.from,
            to = command.to,
            amount = %command.amount,
            "Transfer accepted"
        );
        Ok(true)
    }
}
