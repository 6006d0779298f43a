//! Test utilities and mock implementations.
//!
//! Shared fixtures for unit tests: a small event type, handlers that count or
//! fail, and a delivery sink that records what a gateway hands it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::{
    BrokerGateway, BusError, ChannelGateway, DeliveryHandler, EventHandler, HandlerError,
    Result as BusResult,
};
use crate::domain::{RepositoryError, TransferLog, TransferRepository};
use crate::message::{Event, Message};

/// Minimal event used across bus tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pinged {
    pub seq: u32,
    pub note: String,
}

impl Pinged {
    pub fn new(seq: u32, note: &str) -> Self {
        Self {
            seq,
            note: note.to_string(),
        }
    }
}

impl Message for Pinged {
    const MESSAGE_TYPE: &'static str = "Pinged";
}

impl Event for Pinged {}

/// Handler that counts invocations and remembers each event.
///
/// Clones share counters, so a test can keep one copy and hand the
/// registry a factory producing others.
#[derive(Clone, Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
    built: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Pinged>>>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that records how many handler instances it built.
    pub fn factory(&self) -> impl Fn() -> CountingHandler + Send + Sync + 'static {
        let template = self.clone();
        move || {
            template.built.fetch_add(1, Ordering::SeqCst);
            template.clone()
        }
    }

    /// Number of handled events.
    pub fn count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.count)
    }

    /// Number of instances built by `factory`.
    pub fn built(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.built)
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Pinged>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl EventHandler<Pinged> for CountingHandler {
    async fn handle(&self, event: Pinged) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that always fails.
pub struct FailingHandler;

#[async_trait]
impl EventHandler<Pinged> for FailingHandler {
    async fn handle(&self, _event: Pinged) -> Result<(), HandlerError> {
        Err(HandlerError::Failed("Mock handler failure".to_string()))
    }
}

/// Delivery sink that records `(routing_key, payload)` pairs.
#[derive(Default)]
pub struct RecordingDelivery {
    received: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<(String, Vec<u8>)> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until at least `n` deliveries arrived or `timeout` elapsed.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<(String, Vec<u8>)> {
        wait_until(timeout, || self.received.lock().unwrap().len() >= n).await;
        self.received()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingDelivery {
    async fn on_delivery(&self, routing_key: &str, payload: &[u8]) {
        self.received
            .lock()
            .unwrap()
            .push((routing_key.to_string(), payload.to_vec()));
    }
}

/// Channel gateway whose first `start_consuming` calls fail.
pub struct FlakyGateway {
    inner: ChannelGateway,
    failures_left: AtomicUsize,
}

impl FlakyGateway {
    pub fn failing_starts(failures: usize) -> Self {
        Self {
            inner: ChannelGateway::new(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl BrokerGateway for FlakyGateway {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BusResult<()> {
        self.inner.publish(queue, payload).await
    }

    async fn start_consuming(&self, queue: &str, handler: Arc<dyn DeliveryHandler>) -> BusResult<()> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BusError::Connection("Mock transient failure".to_string()));
        }
        self.inner.start_consuming(queue, handler).await
    }
}

/// Transfer repository that can be told to fail writes.
#[derive(Default)]
pub struct MockTransferRepository {
    logs: tokio::sync::RwLock<Vec<TransferLog>>,
    fail_on_add: tokio::sync::RwLock<bool>,
}

impl MockTransferRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_add(&self, fail: bool) {
        *self.fail_on_add.write().await = fail;
    }
}

#[async_trait]
impl TransferRepository for MockTransferRepository {
    async fn add_record(&self, record: TransferLog) -> Result<(), RepositoryError> {
        if *self.fail_on_add.read().await {
            return Err(RepositoryError::Storage("Mock add failure".to_string()));
        }
        self.logs.write().await.push(record);
        Ok(())
    }

    async fn transfer_logs(&self) -> Result<Vec<TransferLog>, RepositoryError> {
        Ok(self.logs.read().await.clone())
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
