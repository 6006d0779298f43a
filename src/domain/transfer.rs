//! Transfer side: records every announced transfer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::banking::TransferCreatedEvent;
use crate::bus::{EventHandler, HandlerError};

/// One recorded transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLog {
    /// Assigned by the repository; zero until stored.
    pub id: i64,
    pub from_account: i32,
    pub to_account: i32,
    pub transfer_amount: Decimal,
}

impl TransferLog {
    pub fn new(from_account: i32, to_account: i32, transfer_amount: Decimal) -> Self {
        Self {
            id: 0,
            from_account,
            to_account,
            transfer_amount,
        }
    }
}

/// Errors from transfer log storage.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<RepositoryError> for HandlerError {
    fn from(err: RepositoryError) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Storage for transfer logs.
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Persist a transfer log.
    async fn add_record(&self, record: TransferLog) -> Result<(), RepositoryError>;

    /// All stored transfer logs, oldest first.
    async fn transfer_logs(&self) -> Result<Vec<TransferLog>, RepositoryError>;
}

/// In-memory transfer log storage with sequential ids.
#[derive(Default)]
pub struct InMemoryTransferRepository {
    logs: RwLock<Vec<TransferLog>>,
    next_id: AtomicI64,
}

impl InMemoryTransferRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferRepository for InMemoryTransferRepository {
    async fn add_record(&self, mut record: TransferLog) -> Result<(), RepositoryError> {
        record.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.write().await.push(record);
        Ok(())
    }

    async fn transfer_logs(&self) -> Result<Vec<TransferLog>, RepositoryError> {
        Ok(self.logs.read().await.clone())
    }
}

/// Writes a `TransferLog` for every `TransferCreatedEvent`.
pub struct TransferEventHandler {
    repository: Arc<dyn TransferRepository>,
}

impl TransferEventHandler {
    pub fn new(repository: Arc<dyn TransferRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl EventHandler<TransferCreatedEvent> for TransferEventHandler {
    async fn handle(&self, event: TransferCreatedEvent) -> Result<(), HandlerError> {
        let record = TransferLog::new(event.from, event.to, event.amount);
        self.repository.add_record(record).await?;

        debug!(from = event.from, to = event.to, "Recorded transfer");
        Ok(())
    }
}
