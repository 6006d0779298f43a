//! Money-transfer collaborators.
//!
//! - `banking`: the transfer command, the event it produces, and the command
//!   handler that publishes it.
//! - `transfer`: the transfer log kept by the consuming service and the event
//!   handler that writes it.

pub mod banking;
pub mod transfer;

pub use banking::{CreateTransferCommand, TransferCommandHandler, TransferCreatedEvent};
pub use transfer::{
    InMemoryTransferRepository, RepositoryError, TransferEventHandler, TransferLog,
    TransferRepository,
};
