//! In-process channel-based broker gateway.
//!
//! Uses tokio mpsc channels to model broker queues within a single process:
//! - queues are declared on first use and never removed
//! - each queue is FIFO
//! - consumers on the same queue compete; deliveries go round-robin
//! - messages published with no consumer attached wait in the queue
//!
//! Ideal for local development and testing without a RabbitMQ instance.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::{BrokerGateway, DeliveryHandler, Result};

#[derive(Default)]
struct QueueState {
    /// Messages waiting for a consumer.
    backlog: VecDeque<Vec<u8>>,
    /// Attached consumer loops.
    consumers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    /// Round-robin cursor into `consumers`.
    next_consumer: usize,
}

impl QueueState {
    /// Hand a message to the next live consumer, or keep it queued.
    fn deliver(&mut self, mut payload: Vec<u8>) {
        while !self.consumers.is_empty() {
            let idx = self.next_consumer % self.consumers.len();
            match self.consumers[idx].send(payload) {
                Ok(()) => {
                    self.next_consumer = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Consumer task is gone
                    self.consumers.remove(idx);
                    payload = returned;
                }
            }
        }
        self.backlog.push_back(payload);
    }
}

/// In-memory broker gateway.
#[derive(Default)]
pub struct ChannelGateway {
    queues: Mutex<HashMap<String, QueueState>>,
    published: AtomicUsize,
}

impl ChannelGateway {
    /// Create a new channel gateway with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue state for `queue`, created on first use.
    fn declare<'a>(queues: &'a mut HashMap<String, QueueState>, queue: &str) -> &'a mut QueueState {
        if !queues.contains_key(queue) {
            debug!(queue = %queue, "Declared channel queue");
        }
        queues.entry(queue.to_string()).or_default()
    }

    /// Names of every declared queue, sorted.
    pub async fn declared_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total messages published through this gateway.
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of messages waiting in `queue` for a consumer.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Remove and return every message waiting in `queue`.
    pub async fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .await
            .get_mut(queue)
            .map(|q| q.backlog.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerGateway for ChannelGateway {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = Self::declare(&mut queues, queue);
        state.deliver(payload);
        self.published.fetch_add(1, Ordering::SeqCst);

        debug!(
            queue = %queue,
            consumers = state.consumers.len(),
            "Published message to channel queue"
        );
        Ok(())
    }

    async fn start_consuming(&self, queue: &str, handler: Arc<dyn DeliveryHandler>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        {
            let mut queues = self.queues.lock().await;
            let state = Self::declare(&mut queues, queue);
            // Waiting messages go to the newly attached consumer, in order.
            for payload in state.backlog.drain(..) {
                let _ = tx.send(payload);
            }
            state.consumers.push(tx);
        }

        let routing_key = queue.to_string();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                handler.on_delivery(&routing_key, &payload).await;
            }
            info!(queue = %routing_key, "Channel consumer stopped");
        });

        info!(queue = %queue, "Channel consumer started");
        Ok(())
    }
}
